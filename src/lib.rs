pub mod blend;
pub mod config;
pub mod effect;
pub mod events;
pub mod layout;
pub mod surfaces;
pub mod tasks {
    pub mod loader;
    pub mod viewer;
}
