pub mod authenticator;
pub mod keystore;

pub use authenticator::MessageAuthenticator;
pub use keystore::KeyStore;
