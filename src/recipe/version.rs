use std::fmt::{self, Display, Formatter};

/// Package version in `<upstream>-<release>` form, where `release` is the
/// positive build revision distinguishing consecutive builds of the same
/// upstream version.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub upstream: String,
    pub release: u32,
}

impl Version {
    pub fn parse(value: &str) -> Result<Self, String> {
        let (upstream, release) = value
            .rsplit_once('-')
            .ok_or_else(|| format!("version `{value}` is missing its `-<release>` suffix"))?;

        if upstream.is_empty() {
            return Err(format!("version `{value}` has an empty upstream part"));
        }
        if !upstream.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(format!("version `{value}` must start with a digit"));
        }
        if let Some(bad) = upstream
            .chars()
            .find(|&c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '+' | '~' | '-'))
        {
            return Err(format!("version `{value}` contains invalid character `{bad}`"));
        }

        let release: u32 = release
            .parse()
            .map_err(|_| format!("release `{release}` of version `{value}` is not a number"))?;
        if release == 0 {
            return Err(format!("release of version `{value}` must be positive"));
        }

        Ok(Version {
            upstream: upstream.to_owned(),
            release,
        })
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.upstream, self.release)
    }
}
