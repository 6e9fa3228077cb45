use std::fmt;

/// Which callers may read and delete which rows.
///
/// `Legacy` keeps the long-standing behaviour: task deletes and every
/// subtask read or delete ignore ownership, and updates take over whatever
/// row the id names. `Owner` confines all of these to the caller's rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Scoping {
    #[default]
    Legacy,
    Owner,
}

impl Scoping {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Owner => "owner",
        }
    }
}

impl fmt::Display for Scoping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub scoping: Scoping,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            scoping: Scoping::default(),
        }
    }
}
