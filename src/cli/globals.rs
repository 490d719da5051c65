use secrecy::SecretString;

/// Runtime configuration shared with the server action.
#[derive(Clone)]
pub struct GlobalArgs {
    pub auth_url: String,
    pub auth_service_key: SecretString,
    pub sms_gateway_url: Option<String>,
    pub sms_gateway_token: SecretString,
    pub frontend_base_url: String,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(auth_url: String, auth_service_key: SecretString) -> Self {
        Self {
            auth_url,
            auth_service_key,
            sms_gateway_url: None,
            sms_gateway_token: SecretString::default(),
            frontend_base_url: String::new(),
        }
    }
}

impl std::fmt::Debug for GlobalArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalArgs")
            .field("auth_url", &self.auth_url)
            .field("auth_service_key", &"***")
            .field("sms_gateway_url", &self.sms_gateway_url)
            .field("sms_gateway_token", &"***")
            .field("frontend_base_url", &self.frontend_base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let args = GlobalArgs::new(
            "https://auth.example.com".to_string(),
            SecretString::from("service-key"),
        );
        assert_eq!(args.auth_url, "https://auth.example.com");
        assert_eq!(args.auth_service_key.expose_secret(), "service-key");
        assert!(args.sms_gateway_url.is_none());
        assert_eq!(args.sms_gateway_token.expose_secret(), "");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let args = GlobalArgs::new(
            "https://auth.example.com".to_string(),
            SecretString::from("service-key"),
        );
        let rendered = format!("{args:?}");
        assert!(!rendered.contains("service-key"));
        assert!(rendered.contains("***"));
    }
}
