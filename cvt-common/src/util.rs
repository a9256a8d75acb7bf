//! Shared utilities.

const MASK: &str = "***";

/// Keys whose values never reach a log. Longer keys come first so that
/// `POOL_PASSWORD=` wins over `PASSWORD=` at the same position.
const SECRET_KEYS: &[&str] = &[
    "_CONDOR_SEC_PASSWORD_FILE=",
    "AWS_SECRET_ACCESS_KEY=",
    "AZURE_CLIENT_SECRET=",
    "CONDOR_PASSWORD=",
    "POOL_PASSWORD=",
    "--password=",
    "--password ",
    "PASSWORD=",
    "--token=",
    "--token ",
    "SECRET=",
    "TOKEN=",
];

/// Mask credentials in a command line before it reaches a log or artifact.
///
/// Check logs are copied off cluster nodes for debugging; submit and status
/// commands occasionally carry pool passwords or cloud tokens. A value that
/// sits inside a shell-quoted argument is masked up to the closing quote.
pub fn mask_sensitive_command(cmd: &str) -> String {
    let mut out = String::with_capacity(cmd.len());
    let mut quote: Option<char> = None;
    let mut rest = cmd;

    while let Some(c) = rest.chars().next() {
        if let Some(key) = SECRET_KEYS.iter().find(|k| rest.starts_with(**k)) {
            out.push_str(key);
            out.push_str(MASK);
            let value = &rest[key.len()..];
            let len = match quote {
                Some(q) => value.find(q).unwrap_or(value.len()),
                None => bare_value_len(value),
            };
            rest = &value[len..];
            continue;
        }

        quote = match quote {
            Some(q) if c == q => None,
            None if c == '\'' || c == '"' => Some(c),
            other => other,
        };
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Byte length of an unquoted value: up to the first whitespace outside
/// quotes, honouring backslash escapes.
fn bare_value_len(s: &str) -> usize {
    let mut quote: Option<char> = None;
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (_, '\\') => {
                chars.next();
            }
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(c),
            (None, c) if c.is_whitespace() => return i,
            _ => {}
        }
    }
    s.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_sensitive_command() {
        let cmd = "condor_store_cred add -c POOL_PASSWORD=secret123 --token mytoken --password=hidden";
        let masked = mask_sensitive_command(cmd);

        assert!(masked.contains("POOL_PASSWORD=***"));
        assert!(!masked.contains("secret123"));

        assert!(masked.contains("--token ***"));
        assert!(!masked.contains("mytoken"));

        assert!(masked.contains("--password=***"));
        assert!(!masked.contains("hidden"));
    }

    #[test]
    fn test_repeated_keys_all_masked() {
        assert_eq!(mask_sensitive_command("TOKEN=a TOKEN=b"), "TOKEN=*** TOKEN=***");
    }

    #[test]
    fn test_quoted_value_masked_whole() {
        let cmd = "condor_submit PASSWORD=\"my super secret\" sleep.sub";
        assert_eq!(
            mask_sensitive_command(cmd),
            "condor_submit PASSWORD=*** sleep.sub"
        );
    }

    #[test]
    fn test_secret_inside_quoted_argument() {
        let cmd = "env 'AWS_SECRET_ACCESS_KEY=abc def' condor_submit";
        assert_eq!(
            mask_sensitive_command(cmd),
            "env 'AWS_SECRET_ACCESS_KEY=***' condor_submit"
        );
    }

    #[test]
    fn test_escaped_space_stays_in_value() {
        assert_eq!(
            mask_sensitive_command("SECRET=a\\ b next"),
            "SECRET=*** next"
        );
    }

    #[test]
    fn test_masking_is_idempotent() {
        let once = mask_sensitive_command("CONDOR_PASSWORD=x --token=y");
        assert_eq!(mask_sensitive_command(&once), once);
    }

    #[test]
    fn test_plain_commands_untouched() {
        let cmd = "/opt/condor/current/bin/condor_submit -verbose sleep.sub";
        assert_eq!(mask_sensitive_command(cmd), cmd);
    }
}
