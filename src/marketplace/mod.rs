pub mod builder;
pub mod detector;
pub mod router;
pub mod validator;

pub use builder::build;
pub use validator::LinkValidator;
