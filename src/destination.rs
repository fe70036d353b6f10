/// ssh options that consume a value, either attached (`-p22`) or as the next argument.
const FLAGS_WITH_VALUE: &str = "BbcDEeFIiJLlmOoPpQRSWw";

/// Find the destination among ssh arguments and reduce it to the bare host name.
///
/// Option values are skipped so `ssh -p 2222 -o User=x host` yields `host`.
/// Returns `None` when the arguments carry no destination (e.g. `ssh -V`).
pub fn destination(args: &[String]) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--" {
            return iter.next().map(|dest| host_of(dest));
        }
        if let Some(flags) = arg.strip_prefix('-') {
            if flags.is_empty() {
                return Some(host_of(arg));
            }
            if let Some(pos) = flags.find(|c| FLAGS_WITH_VALUE.contains(c)) {
                // Value is the rest of this argument, or the next one
                if pos + 1 == flags.len() {
                    iter.next();
                }
            }
            continue;
        }
        return Some(host_of(arg));
    }
    None
}

/// Strip `ssh://`, `user@` and (for URIs) `:port` from a destination.
pub fn host_of(dest: &str) -> String {
    let (uri, rest) = match dest.strip_prefix("ssh://") {
        Some(rest) => (true, rest),
        None => (false, dest),
    };

    let rest = match rest.rfind('@') {
        Some(at) => &rest[at + 1..],
        None => rest,
    };

    if !uri {
        return rest.to_string();
    }

    let rest = rest.trim_end_matches('/');
    if let Some(inner) = rest.strip_prefix('[') {
        // Bracketed IPv6: [2001:db8::1]:2222
        if let Some(end) = inner.find(']') {
            return inner[..end].to_string();
        }
        return rest.to_string();
    }
    match rest.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host.to_string(),
        _ => rest.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plain_host() {
        assert_eq!(destination(&args(&["prod-db1"])).unwrap(), "prod-db1");
    }

    #[test]
    fn test_user_at_host_with_command() {
        assert_eq!(
            destination(&args(&["root@prod-db1", "uptime"])).unwrap(),
            "prod-db1"
        );
    }

    #[test]
    fn test_skips_option_values() {
        let list = args(&["-p", "2222", "-o", "User=admin", "-i", "~/.ssh/key", "web1"]);
        assert_eq!(destination(&list).unwrap(), "web1");
    }

    #[test]
    fn test_attached_option_values() {
        let list = args(&["-p2222", "-lroot", "-vvv", "web1"]);
        assert_eq!(destination(&list).unwrap(), "web1");
    }

    #[test]
    fn test_flag_cluster_ending_with_value_flag() {
        let list = args(&["-At", "-vL", "8080:localhost:80", "web1"]);
        assert_eq!(destination(&list).unwrap(), "web1");
    }

    #[test]
    fn test_double_dash() {
        let list = args(&["-v", "--", "-weird-host"]);
        assert_eq!(destination(&list).unwrap(), "-weird-host");
    }

    #[test]
    fn test_no_destination() {
        assert!(destination(&args(&["-V"])).is_none());
        assert!(destination(&args(&["-p", "22"])).is_none());
        assert!(destination(&[]).is_none());
    }

    #[test]
    fn test_ssh_uri() {
        assert_eq!(host_of("ssh://admin@db.example.com:2222"), "db.example.com");
        assert_eq!(host_of("ssh://db.example.com"), "db.example.com");
        assert_eq!(host_of("ssh://[2001:db8::1]:22"), "2001:db8::1");
    }

    #[test]
    fn test_bare_ipv6_keeps_colons() {
        assert_eq!(host_of("admin@2001:db8::1"), "2001:db8::1");
    }
}
