pub mod credentials;

pub use credentials::Entity as Credentials;
