//! Typed command lines
//!
//! Commands are built as argument vectors and never passed through a
//! shell. The binary is one of a closed set of tools, so a rendered plan
//! cannot name anything the executor would not run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tools the pipeline may invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Binary {
    Sysctl,
    Tc,
    Nft,
    Ethtool,
    Ip,
    Ping,
    Iperf3,
    Dig,
    Curl,
}

impl Binary {
    pub const ALL: [Binary; 9] = [
        Binary::Sysctl,
        Binary::Tc,
        Binary::Nft,
        Binary::Ethtool,
        Binary::Ip,
        Binary::Ping,
        Binary::Iperf3,
        Binary::Dig,
        Binary::Curl,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Binary::Sysctl => "sysctl",
            Binary::Tc => "tc",
            Binary::Nft => "nft",
            Binary::Ethtool => "ethtool",
            Binary::Ip => "ip",
            Binary::Ping => "ping",
            Binary::Iperf3 => "iperf3",
            Binary::Dig => "dig",
            Binary::Curl => "curl",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Binary::ALL.iter().copied().find(|b| b.name() == name)
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single command as an argument vector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandLine {
    pub binary: Binary,
    pub args: Vec<String>,
    /// Non-zero exit is expected and not an error (e.g. deleting a qdisc
    /// that does not exist)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tolerate_failure: bool,
}

impl CommandLine {
    pub fn new(binary: Binary) -> Self {
        Self { binary, args: Vec::new(), tolerate_failure: false }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn tolerate_failure(mut self) -> Self {
        self.tolerate_failure = true;
        self
    }

    /// Full argv including the binary name
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.binary.name().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Whether the argv starts with the given words
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        let argv = self.argv();
        argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary.name())?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.:/=@%+,".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
