use crate::{api, cli::globals::GlobalArgs};
use anyhow::Result;
use secrecy::SecretString;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub auth_url: String,
    pub auth_service_key: SecretString,
    pub sms_gateway_url: Option<String>,
    pub sms_gateway_token: SecretString,
    pub frontend_base_url: String,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let mut globals = GlobalArgs::new(args.auth_url, args.auth_service_key);
    globals.sms_gateway_url = args.sms_gateway_url;
    globals.sms_gateway_token = args.sms_gateway_token;
    globals.frontend_base_url = args.frontend_base_url;

    debug!("Global args: {:?}", globals);

    api::new(args.port, args.dsn, &globals).await
}
