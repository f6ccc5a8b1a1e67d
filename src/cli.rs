use clap::ArgAction;
use clap::Parser;

/// Run stored HTTP API tests against an environment
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Workspace file with environments, requests, tests and suites
    #[arg(short, long, default_value = "assay.toml")]
    pub path: String,

    /// Environment to substitute from; defaults to the one marked `default`
    #[arg(short, long)]
    pub env: Option<String>,

    /// Run only this suite
    #[arg(short, long, conflicts_with = "request")]
    pub suite: Option<String>,

    /// Execute a single request and print the response envelope as JSON
    #[arg(short, long)]
    pub request: Option<String>,

    /// Tests in flight at once, overriding `settings.concurrency`
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: Option<u16>,

    /// Write suite results as JSON to this file
    #[arg(long)]
    pub report: Option<String>,

    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// `RUST_LOG` wins when set.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "assay=warn",
            1 => "assay=info",
            _ => "assay=debug",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["assay"]);

        assert_eq!(cli.path, "assay.toml");
        assert!(cli.env.is_none());
        assert_eq!(cli.log_directive(), "assay=warn");
    }

    #[test]
    fn flags() {
        let cli = Cli::parse_from([
            "assay", "--env", "staging", "--suite", "smoke", "-c", "4", "-vv",
        ]);

        assert_eq!(cli.env.as_deref(), Some("staging"));
        assert_eq!(cli.suite.as_deref(), Some("smoke"));
        assert_eq!(cli.concurrency, Some(4));
        assert_eq!(cli.log_directive(), "assay=debug");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(Cli::try_parse_from(["assay", "-c", "0"]).is_err());
    }

    #[test]
    fn suite_and_request_conflict() {
        assert!(Cli::try_parse_from(["assay", "-s", "a", "-r", "b"]).is_err());
    }
}
