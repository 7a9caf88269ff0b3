pub mod collaborators;
pub mod errors;
pub mod events;
pub mod ids;
pub mod protocol;
pub mod tools;
pub mod truncate;
