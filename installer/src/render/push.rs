//! Configuration read by `push_metrics.sh` and `report_instance_data.sh`.

use super::check_line;
use crate::{settings::PushDefaults, Error};

/// Name of the push-gateway configuration file (inside the config directory).
pub const CONFIG_FILE: &str = ".push_metrics.cfg";

/// Push-gateway credentials and labels.
///
/// Reporting stays off until an operator has checked the values and set `enabled=1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub metrics_host: String,
    pub metrics_user: String,
    pub metrics_passwd: String,
    pub metrics_job: String,
    pub metrics_instance: String,
    pub metrics_customer: String,
    pub enabled: bool,
}

impl Config {
    /// Template with placeholder credentials for `instance`, disabled.
    pub fn template(defaults: &PushDefaults, instance: String) -> Self {
        Self {
            metrics_host: defaults.metrics_host.clone(),
            metrics_user: defaults.metrics_user.clone(),
            metrics_passwd: defaults.metrics_passwd.clone(),
            metrics_job: defaults.metrics_job.clone(),
            metrics_instance: instance,
            metrics_customer: defaults.metrics_customer.clone(),
            enabled: false,
        }
    }

    /// Validates and renders the `key=value` file.
    pub fn render(&self) -> Result<String, Error> {
        let pairs = [
            ("metrics_host", self.metrics_host.as_str()),
            ("metrics_user", self.metrics_user.as_str()),
            ("metrics_passwd", self.metrics_passwd.as_str()),
            ("metrics_job", self.metrics_job.as_str()),
            ("metrics_instance", self.metrics_instance.as_str()),
            ("metrics_customer", self.metrics_customer.as_str()),
        ];
        let mut rendered =
            String::from("# Set these values as appropriate for your push-gateway.\n");
        for (key, value) in pairs {
            check_line(key, value)?;
            if value.chars().any(char::is_whitespace) {
                return Err(Error::InvalidField {
                    field: key.to_string(),
                    reason: "must not contain whitespace".to_string(),
                });
            }
            rendered.push_str(&format!("{key}={value}\n"));
        }
        rendered.push_str("# Set this to 1 after checking the values above\n");
        rendered.push_str(&format!("enabled={}\n", u8::from(self.enabled)));
        Ok(rendered)
    }
}
