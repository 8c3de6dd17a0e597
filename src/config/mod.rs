//! Credentials shipped with the application and ambient gateway settings.

pub mod credentials;
pub mod settings;

pub use credentials::{read_credentials, Bundle, Credentials, APP_TOKEN_KEY, CREDENTIALS_RESOURCE, OWNER_ID_KEY};
pub use settings::GatewaySettings;
