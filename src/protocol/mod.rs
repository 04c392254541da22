pub mod canonical;
pub mod envelope;
pub mod event_tagged;
pub mod free_form;
pub mod request;

use canonical::{CanonicalUpdates, ProviderFamily};

/// Decode one parsed chunk with the decoder of the given family.
#[must_use]
pub fn decode_chunk(family: ProviderFamily, chunk: &serde_json::Value) -> CanonicalUpdates {
    let mut out = CanonicalUpdates::new();
    decode_chunk_into(family, chunk, &mut out);
    out
}

/// Decode one parsed chunk into a caller-provided buffer.
pub fn decode_chunk_into(
    family: ProviderFamily,
    chunk: &serde_json::Value,
    out: &mut CanonicalUpdates,
) {
    match family {
        ProviderFamily::EventTagged => event_tagged::decode_event_chunk_into(chunk, out),
        ProviderFamily::FreeForm => free_form::decode_free_form_chunk_into(chunk, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::CanonicalUpdate;
    use serde_json::json;

    #[test]
    fn test_family_is_not_inferred_from_shape() {
        // An event-shaped chunk under the free-form family matches nothing,
        // and a free-form chunk under the event family is ignored.
        let event_chunk = json!({"event":"message","data":{"delta":"hi"}});
        let free_chunk = json!({"output":"hi"});
        assert!(decode_chunk(ProviderFamily::FreeForm, &event_chunk).is_empty());
        assert!(decode_chunk(ProviderFamily::EventTagged, &free_chunk).is_empty());
        assert_eq!(
            decode_chunk(ProviderFamily::EventTagged, &event_chunk).as_slice(),
            &[CanonicalUpdate::append("hi")]
        );
    }
}
