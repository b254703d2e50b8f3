use super::super::{ErrorKind, Result};

/// A node-level user
///
/// The first user on a machine config carries the ssh key injected into
/// rendered machine templates.
///
/// ```yaml
/// users:
/// - name: ec2-user
///   sshAuthorizedKeys:
///   - "ssh-rsa AAAA... admin@corp"
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UserConfiguration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sshAuthorizedKeys: Vec<String>,
}

impl UserConfiguration {
    /// The first authorized key with its trailing comment stripped
    ///
    /// Rendered templates must not carry the free-form comment field since
    /// some bootstrap providers choke on spaces in it.
    pub fn stripped_ssh_key(&self) -> Result<String> {
        let raw = match self.sshAuthorizedKeys.first() {
            Some(k) => k.trim(),
            None => return Ok("".into()),
        };
        if raw.is_empty() {
            return Ok("".into());
        }
        let mut parts = raw.split_whitespace();
        let algo = parts.next();
        let blob = parts.next();
        match (algo, blob) {
            (Some(a), Some(b)) if a.starts_with("ssh-") || a.starts_with("ecdsa-") => {
                Ok(format!("{} {}", a, b))
            }
            _ => Err(ErrorKind::InvalidSshKey(raw.to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::UserConfiguration;

    fn user(keys: Vec<&str>) -> UserConfiguration {
        UserConfiguration {
            name: "ec2-user".into(),
            sshAuthorizedKeys: keys.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn comment_is_stripped() {
        let u = user(vec!["ssh-rsa AAAAB3Nza admin@corp laptop"]);
        assert_eq!(u.stripped_ssh_key().unwrap(), "ssh-rsa AAAAB3Nza");
        let u = user(vec!["ecdsa-sha2-nistp256 AAAAE2Vj"]);
        assert_eq!(u.stripped_ssh_key().unwrap(), "ecdsa-sha2-nistp256 AAAAE2Vj");
    }

    #[test]
    fn missing_key_is_empty() {
        assert_eq!(user(vec![]).stripped_ssh_key().unwrap(), "");
        assert_eq!(user(vec!["  "]).stripped_ssh_key().unwrap(), "");
    }

    #[test]
    fn garbage_key_errors() {
        assert!(user(vec!["not a key"]).stripped_ssh_key().is_err());
        assert!(user(vec!["ssh-rsa"]).stripped_ssh_key().is_err());
    }
}
