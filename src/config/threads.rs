use serde::{Deserialize, Serialize};

/// Deployment whose thread numbering is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreadEnvironment {
    #[default]
    Prod,
    Stage,
    Local,
}

/// A subject thread on the event-streaming backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadOption {
    pub id: u32,
    pub label: &'static str,
    pub subject: &'static str,
}

const fn thread(id: u32, label: &'static str, subject: &'static str) -> ThreadOption {
    ThreadOption { id, label, subject }
}

const PROD_THREADS: &[ThreadOption] = &[
    thread(1, "Physics", "physics"),
    thread(2, "Chemistry", "chemistry"),
    thread(4, "Biology", "biology"),
    thread(3, "Math", "mathematics"),
    thread(69, "Science", "science"),
    thread(35, "English", "english"),
    thread(68, "Higher Math", "higher-math"),
    thread(67, "ICT", "ict"),
    thread(34, "Bangla", "bangla"),
];

// stage and local share numbering
const STAGE_THREADS: &[ThreadOption] = &[
    thread(3, "ICT", "ict"),
    thread(4, "Biology", "biology"),
    thread(2, "Chemistry", "chemistry"),
    thread(5, "Bangla", "bangla"),
    thread(7, "Physics", "physics"),
    thread(6, "English", "english"),
    thread(1, "Math", "mathematics"),
    thread(8, "Science", "science"),
    thread(9, "Higher Math", "higher-math"),
];

#[must_use]
pub fn thread_options(env: ThreadEnvironment) -> &'static [ThreadOption] {
    match env {
        ThreadEnvironment::Prod => PROD_THREADS,
        ThreadEnvironment::Stage | ThreadEnvironment::Local => STAGE_THREADS,
    }
}

#[must_use]
pub fn find_thread(env: ThreadEnvironment, thread_id: u32) -> Option<&'static ThreadOption> {
    thread_options(env).iter().find(|t| t.id == thread_id)
}

#[must_use]
pub fn label_for_thread(env: ThreadEnvironment, thread_id: u32) -> Option<&'static str> {
    find_thread(env, thread_id).map(|t| t.label)
}

#[must_use]
pub fn subject_for_thread(env: ThreadEnvironment, thread_id: u32) -> Option<&'static str> {
    find_thread(env, thread_id).map(|t| t.subject)
}

#[must_use]
pub fn thread_for_subject(env: ThreadEnvironment, subject: &str) -> Option<u32> {
    thread_options(env)
        .iter()
        .find(|t| t.subject.eq_ignore_ascii_case(subject))
        .map(|t| t.id)
}
