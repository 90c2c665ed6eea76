//! Issuer argument construction.

use std::path::{Path, PathBuf};

use certrelay_common::IssuerMode;
use certrelay_config::Config;

/// A structured issuer invocation. Never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Files the issuer writes for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub cert: PathBuf,
    pub chain: PathBuf,
    pub fullchain: PathBuf,
}

impl OutputPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            cert: dir.join("cert.pem"),
            chain: dir.join("chain.pem"),
            fullchain: dir.join("fullchain.pem"),
        }
    }
}

impl IssuerCommand {
    /// Build a `certonly` run issuing `domain` from the staged CSR with the
    /// configured DNS-01 plugin.
    pub fn certonly(config: &Config, domain: &str) -> Self {
        let issuer = &config.issuer;
        let plugin = issuer.dns_plugin.as_str();
        let output = OutputPaths::in_dir(&config.output_dir(domain));

        let mut args: Vec<String> = vec![
            "certonly".into(),
            "--non-interactive".into(),
            "--agree-tos".into(),
        ];

        match &issuer.email {
            Some(email) => {
                args.push("--email".into());
                args.push(email.clone());
            }
            None => args.push("--register-unsafely-without-email".into()),
        }

        if issuer.mode == IssuerMode::Test {
            args.push("--test-cert".into());
        }

        if let Some(server) = &issuer.server {
            args.push("--server".into());
            args.push(server.clone());
        }

        args.push("--csr".into());
        args.push(path_arg(&config.paths.csr));

        args.push(format!("--{}", plugin));
        args.push(format!("--{}-credentials", plugin));
        args.push(path_arg(&config.paths.credential));

        if let Some(seconds) = issuer.propagation_seconds {
            args.push(format!("--{}-propagation-seconds", plugin));
            args.push(seconds.to_string());
        }

        args.push("--cert-path".into());
        args.push(path_arg(&output.cert));
        args.push("--chain-path".into());
        args.push(path_arg(&output.chain));
        args.push("--fullchain-path".into());
        args.push(path_arg(&output.fullchain));

        Self {
            program: issuer.binary.clone(),
            args,
        }
    }

    /// Rewrite every path-valued argument with `map`.
    ///
    /// Path-valued flags are `--csr`, the plugin credentials flag and the
    /// `--*-path` output flags.
    pub fn map_paths(&self, map: impl Fn(&Path) -> PathBuf) -> Self {
        let mut args = self.args.clone();
        for i in 1..args.len() {
            if is_path_flag(&args[i - 1]) {
                args[i] = path_arg(&map(Path::new(&args[i])));
            }
        }
        Self {
            program: self.program.clone(),
            args,
        }
    }

    /// Value following `flag`, if present.
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

fn is_path_flag(arg: &str) -> bool {
    arg.starts_with("--")
        && (arg == "--csr" || arg.ends_with("-path") || arg.ends_with("-credentials"))
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_test_mode_arguments() {
        let command = IssuerCommand::certonly(&Config::default(), "example.com");
        assert_eq!(command.program, "certbot");
        insta::assert_snapshot!(
            command.args.join(" "),
            @"certonly --non-interactive --agree-tos --register-unsafely-without-email --test-cert --csr /tmp/csr --dns-google --dns-google-credentials /root/google-creds.json --cert-path /etc/letsencrypt/staging/example.com/cert.pem --chain-path /etc/letsencrypt/staging/example.com/chain.pem --fullchain-path /etc/letsencrypt/staging/example.com/fullchain.pem"
        );
    }

    #[test]
    fn test_production_arguments_with_options() {
        let mut config = Config::default();
        config.issuer.mode = IssuerMode::Production;
        config.issuer.email = Some("ops@example.com".to_string());
        config.issuer.server = Some("https://acme.example/directory".to_string());
        config.issuer.dns_plugin = "dns-cloudflare".to_string();
        config.issuer.propagation_seconds = Some(60);

        let command = IssuerCommand::certonly(&config, "example.com");
        insta::assert_snapshot!(
            command.args.join(" "),
            @"certonly --non-interactive --agree-tos --email ops@example.com --server https://acme.example/directory --csr /tmp/csr --dns-cloudflare --dns-cloudflare-credentials /root/google-creds.json --dns-cloudflare-propagation-seconds 60 --cert-path /etc/letsencrypt/live/example.com/cert.pem --chain-path /etc/letsencrypt/live/example.com/chain.pem --fullchain-path /etc/letsencrypt/live/example.com/fullchain.pem"
        );
    }

    #[test]
    fn test_arg_value() {
        let command = IssuerCommand::certonly(&Config::default(), "example.com");
        assert_eq!(command.arg_value("--csr"), Some("/tmp/csr"));
        assert_eq!(
            command.arg_value("--fullchain-path"),
            Some("/etc/letsencrypt/staging/example.com/fullchain.pem")
        );
        assert_eq!(command.arg_value("--email"), None);
    }

    #[test]
    fn test_map_paths_rewrites_only_path_arguments() {
        let mut config = Config::default();
        config.issuer.email = Some("ops@example.com".to_string());
        config.issuer.propagation_seconds = Some(60);

        let command = IssuerCommand::certonly(&config, "example.com")
            .map_paths(|p| Path::new("/srv/env").join(p.strip_prefix("/").unwrap_or(p)));

        assert_eq!(command.arg_value("--csr"), Some("/srv/env/tmp/csr"));
        assert_eq!(
            command.arg_value("--dns-google-credentials"),
            Some("/srv/env/root/google-creds.json")
        );
        assert_eq!(
            command.arg_value("--cert-path"),
            Some("/srv/env/etc/letsencrypt/staging/example.com/cert.pem")
        );
        assert_eq!(
            command.arg_value("--fullchain-path"),
            Some("/srv/env/etc/letsencrypt/staging/example.com/fullchain.pem")
        );
        assert_eq!(command.arg_value("--email"), Some("ops@example.com"));
        assert_eq!(command.arg_value("--dns-google-propagation-seconds"), Some("60"));
        assert!(command.args.contains(&"--dns-google".to_string()));
    }
}
