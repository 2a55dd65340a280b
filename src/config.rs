// config.rs
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mpesa_consumer_key: String,
    pub mpesa_consumer_secret: String,
    pub mpesa_short_code: String,
    pub mpesa_passkey: String,
    pub mpesa_callback_url: String,
    pub mpesa_result_url: String,
    pub mpesa_timeout_url: String,
    pub mpesa_initiator_name: String,
    pub mpesa_security_credential: String,
    pub mpesa_environment: String,
    pub database_url: String,
    pub port: u16,
    pub frontend_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mpesa_environment =
            env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string());

        AppConfig {
            mpesa_consumer_key: env::var("MPESA_CONSUMER_KEY")
                .expect("MPESA_CONSUMER_KEY must be set"),
            mpesa_consumer_secret: env::var("MPESA_CONSUMER_SECRET")
                .expect("MPESA_CONSUMER_SECRET must be set"),
            mpesa_short_code: env::var("MPESA_BUSINESS_SHORT_CODE")
                .expect("MPESA_BUSINESS_SHORT_CODE must be set"),
            mpesa_passkey: env::var("MPESA_PASSKEY").expect("MPESA_PASSKEY must be set"),
            mpesa_callback_url: env::var("MPESA_CALLBACK_URL")
                .expect("MPESA_CALLBACK_URL must be set"),
            mpesa_result_url: env::var("MPESA_RESULT_URL").expect("MPESA_RESULT_URL must be set"),
            mpesa_timeout_url: env::var("MPESA_TIMEOUT_URL")
                .expect("MPESA_TIMEOUT_URL must be set"),
            mpesa_initiator_name: env::var("MPESA_INITIATOR_NAME")
                .expect("MPESA_INITIATOR_NAME must be set"),
            mpesa_security_credential: env::var("MPESA_SECURITY_CREDENTIAL")
                .expect("MPESA_SECURITY_CREDENTIAL must be set"),
            mpesa_environment,
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .expect("PORT must be a number"),
            frontend_url: env::var("FRONTEND_URL").ok(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.mpesa_environment == "production"
    }

    pub fn base_url(&self) -> &'static str {
        if self.is_production() {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        }
    }

    pub fn auth_url(&self) -> String {
        format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.base_url()
        )
    }

    pub fn stk_push_url(&self) -> String {
        format!("{}/mpesa/stkpush/v1/processrequest", self.base_url())
    }

    pub fn stk_query_url(&self) -> String {
        format!("{}/mpesa/stkpushquery/v1/query", self.base_url())
    }

    pub fn b2c_url(&self) -> String {
        format!("{}/mpesa/b2c/v1/paymentrequest", self.base_url())
    }

    pub fn b2b_url(&self) -> String {
        format!("{}/mpesa/b2b/v1/paymentrequest", self.base_url())
    }

    pub fn balance_url(&self) -> String {
        format!("{}/mpesa/accountbalance/v1/query", self.base_url())
    }

    pub fn transaction_status_url(&self) -> String {
        format!("{}/mpesa/transactionstatus/v1/query", self.base_url())
    }

    pub fn qr_url(&self) -> String {
        format!("{}/mpesa/qrcode/v1/generate", self.base_url())
    }

    pub fn reversal_url(&self) -> String {
        format!("{}/mpesa/reversal/v1/request", self.base_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_config() -> AppConfig {
        AppConfig {
            mpesa_consumer_key: "key".into(),
            mpesa_consumer_secret: "secret".into(),
            mpesa_short_code: "174379".into(),
            mpesa_passkey: "passkey".into(),
            mpesa_callback_url: "https://example.com/callback".into(),
            mpesa_result_url: "https://example.com/result".into(),
            mpesa_timeout_url: "https://example.com/timeout".into(),
            mpesa_initiator_name: "testapi".into(),
            mpesa_security_credential: "credential".into(),
            mpesa_environment: "sandbox".into(),
            database_url: "mongodb://localhost:27017/mpesa".into(),
            port: 3001,
            frontend_url: None,
        }
    }

    #[test]
    fn sandbox_selects_sandbox_base_url() {
        let config = sandbox_config();
        assert!(!config.is_production());
        assert_eq!(config.base_url(), "https://sandbox.safaricom.co.ke");
        assert!(config.stk_push_url().starts_with("https://sandbox."));
    }

    #[test]
    fn production_selects_live_base_url() {
        let mut config = sandbox_config();
        config.mpesa_environment = "production".into();
        assert!(config.is_production());
        assert_eq!(config.base_url(), "https://api.safaricom.co.ke");
        assert_eq!(
            config.reversal_url(),
            "https://api.safaricom.co.ke/mpesa/reversal/v1/request"
        );
    }
}
