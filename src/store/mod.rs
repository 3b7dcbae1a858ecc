pub mod identity;
pub mod local;
pub mod rest;
pub mod service;

pub use identity::resolve_user_id;
pub use local::LocalStore;
pub use rest::RestClient;
pub use service::PodcastService;
