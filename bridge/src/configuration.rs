// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use clap::Args;

use crate::constants::{DEFAULT_BIND_ATTEMPTS, DEFAULT_MAX_CONNECTIONS};
use crate::endpoint::Endpoint;
use crate::mappings::Mapping;

/// Tuning shared by every forwarder a supervisor starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Args)]
pub struct ForwardOptions {
    /// Maximum simultaneous relayed connections; extra connections are closed.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, env("BRIDGE_MAX_CONNECTIONS"))]
    pub max_connections: usize,
    /// Bind attempts while the local endpoint is still in use.
    #[arg(long, default_value_t = DEFAULT_BIND_ATTEMPTS, env("BRIDGE_BIND_ATTEMPTS"))]
    pub bind_attempts: u32,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        ForwardOptions {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            bind_attempts: DEFAULT_BIND_ATTEMPTS,
        }
    }
}

/// Arguments of the hidden `forward` subcommand that runs one relay worker.
#[derive(Debug, Clone, Args)]
pub struct ForwardArgs {
    #[arg(long)]
    pub id: String,
    #[arg(long)]
    pub listen: Endpoint,
    #[arg(long)]
    pub target: Endpoint,
    #[arg(long, default_value = "")]
    pub label: String,
    #[command(flatten)]
    pub options: ForwardOptions,
}

impl ForwardArgs {
    /// Command-line arguments that reproduce this invocation. The listen
    /// argument is emitted as a single `--listen=<endpoint>` token so it
    /// matches [`Endpoint::signature`] exactly.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            format!("--id={}", self.id),
            self.listen.signature(),
            format!("--target={}", self.target),
            format!("--label={}", self.label),
            format!("--max-connections={}", self.options.max_connections),
            format!("--bind-attempts={}", self.options.bind_attempts),
        ]
    }

    pub fn mapping_id(&self) -> &str {
        &self.id
    }
}

impl From<(&Mapping, ForwardOptions)> for ForwardArgs {
    fn from((mapping, options): (&Mapping, ForwardOptions)) -> Self {
        ForwardArgs {
            id: mapping.id.clone(),
            listen: mapping.local.clone(),
            target: mapping.remote.clone(),
            label: mapping.label.clone(),
            options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        forward: ForwardArgs,
    }

    fn sample_mapping() -> Mapping {
        Mapping {
            id: "https".to_string(),
            direction: crate::mappings::Direction::GuestToHost,
            local: Endpoint::tcp("127.0.0.1", 443),
            remote: Endpoint::vsock(3, 8002),
            label: "HTTPS passthrough".to_string(),
        }
    }

    #[test]
    fn test_to_args_contains_signature() {
        let mapping = sample_mapping();
        let args = ForwardArgs::from((&mapping, ForwardOptions::default()));
        let argv = args.to_args();

        assert!(argv.contains(&mapping.signature()));
        assert!(argv.contains(&"--target=vsock:3:8002".to_string()));
    }

    #[test]
    fn test_args_parse_back() {
        let mapping = sample_mapping();
        let options = ForwardOptions {
            max_connections: 8,
            bind_attempts: 1,
        };
        let argv = ForwardArgs::from((&mapping, options)).to_args();

        let cli = TestCli::try_parse_from(std::iter::once("forward".to_string()).chain(argv))
            .unwrap();
        assert_eq!(cli.forward.mapping_id(), "https");
        assert_eq!(cli.forward.listen, mapping.local);
        assert_eq!(cli.forward.target, mapping.remote);
        assert_eq!(cli.forward.label, "HTTPS passthrough");
        assert_eq!(cli.forward.options, options);
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let result = TestCli::try_parse_from([
            "forward",
            "--id=x",
            "--listen=bogus",
            "--target=vsock:3:1",
        ]);
        assert!(result.is_err());
    }
}
