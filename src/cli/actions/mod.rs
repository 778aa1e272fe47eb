pub mod server;

use secrecy::SecretString;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        provider_url: String,
        provider_api_key: SecretString,
        app_name: String,
        app_id: String,
        signing_key: SecretString,
    },
}
