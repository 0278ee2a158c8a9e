pub mod clock;
pub mod config;
pub mod error;
pub mod models {
    pub mod document;
    pub mod slug;
    pub mod validation;
}
pub mod db {
    pub mod allocator;
    pub mod models;
    pub mod repository;
}
pub mod auth {
    pub mod models;
    pub mod session;
}
pub mod api {
    pub mod documents;
    pub mod errors;
}
pub mod editor {
    pub mod autosave;
    pub mod backup;
    pub mod buffer;
    pub mod gateway;
    pub mod session;
}

#[cfg(feature = "server")]
pub mod app;
