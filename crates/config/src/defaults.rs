//! Embedded default configuration.

use crate::Config;

/// Configuration used when no file is given on the command line.
pub const DEFAULT_CONFIG_KDL: &str = r#"
// certrelay default configuration
//
// Issues staging certificates with certbot's Google Cloud DNS plugin.
// Provide a credential block to install the DNS-provider credential.

issuer {
    binary "certbot"
    mode "test"
    dns-plugin "dns-google"
    command-timeout-secs 600
}

paths {
    environment-root "/"
    csr "/tmp/csr"
    credential "/root/google-creds.json"
    output-root "/etc/letsencrypt"
}

retry {
    max-retries 5
    base-delay-secs 30
    max-delay-secs 1800
    jitter 0.2
}

workers {
    max-concurrent 1
}

logging {
    level "info"
    format "pretty"
}
"#;

/// Programmatic equivalent of [`DEFAULT_CONFIG_KDL`].
pub fn create_default_config() -> Config {
    Config::default()
}
