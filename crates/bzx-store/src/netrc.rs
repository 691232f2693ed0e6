//! `.netrc` credential lookup for mirrors configured through `BZX_BASE_URL`.

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use url::Url;

use crate::http::Auth;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Default, Clone)]
pub struct Netrc {
    machines: Vec<(String, Credentials)>,
    default: Option<Credentials>,
}

#[derive(Default)]
struct Entry {
    machine: Option<String>,
    is_default: bool,
    login: String,
    password: String,
}

impl Netrc {
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        let mut netrc = Self::default();
        let mut current: Option<Entry> = None;
        let mut in_macdef = false;
        for line in contents.lines() {
            if in_macdef {
                in_macdef = !line.trim().is_empty();
                continue;
            }
            let mut tokens = line.split_whitespace();
            while let Some(token) = tokens.next() {
                match token {
                    "machine" => {
                        netrc.finish(current.take());
                        current = Some(Entry {
                            machine: tokens.next().map(ToOwned::to_owned),
                            ..Entry::default()
                        });
                    }
                    "default" => {
                        netrc.finish(current.take());
                        current = Some(Entry {
                            is_default: true,
                            ..Entry::default()
                        });
                    }
                    "login" => {
                        if let (Some(entry), Some(value)) = (current.as_mut(), tokens.next()) {
                            entry.login = value.to_string();
                        }
                    }
                    "password" => {
                        if let (Some(entry), Some(value)) = (current.as_mut(), tokens.next()) {
                            entry.password = value.to_string();
                        }
                    }
                    "account" => {
                        tokens.next();
                    }
                    "macdef" => {
                        in_macdef = true;
                        break;
                    }
                    _ => {}
                }
            }
        }
        netrc.finish(current);
        netrc
    }

    fn finish(&mut self, entry: Option<Entry>) {
        let Some(entry) = entry else {
            return;
        };
        let credentials = Credentials {
            login: entry.login,
            password: entry.password,
        };
        if entry.is_default {
            self.default = Some(credentials);
        } else if let Some(machine) = entry.machine {
            self.machines.push((machine, credentials));
        }
    }

    /// Reads `$NETRC`, or `~/.netrc` (`~/_netrc` on Windows). Missing files yield `None`.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read.
    pub fn load() -> Result<Option<Self>> {
        let Some(path) = netrc_path() else {
            return Ok(None);
        };
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(Self::parse(&contents))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("could not read {}", path.display())),
        }
    }

    #[must_use]
    pub fn credentials_for(&self, host: &str) -> Option<&Credentials> {
        self.machines
            .iter()
            .find(|(machine, _)| machine.eq_ignore_ascii_case(host))
            .map(|(_, credentials)| credentials)
            .or(self.default.as_ref())
    }

    /// Basic auth for the host of `url`, if the file names it.
    #[must_use]
    pub fn auth_for_url(&self, url: &str) -> Option<Auth> {
        let host = Url::parse(url).ok()?.host_str()?.to_string();
        self.credentials_for(&host).map(|credentials| Auth::Basic {
            login: credentials.login.clone(),
            password: credentials.password.clone(),
        })
    }
}

fn netrc_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os("NETRC").filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }
    let name = if cfg!(windows) { "_netrc" } else { ".netrc" };
    dirs_next::home_dir().map(|home| home.join(name))
}
