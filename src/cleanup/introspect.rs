//! Working out which container (if any) this process runs in.
//!
//! `HOSTNAME` is checked first: Docker sets it to the short container id
//! unless `--hostname` overrides it. Otherwise `/proc/self/cgroup` is scanned
//! for a 64-hex-digit id, which covers cgroup v1 (`/docker/<id>`) and systemd
//! v2 layouts (`docker-<id>.scope`).

pub trait RuntimeIntrospection: Send + Sync {
    /// Id (short or full) of the container this process runs in.
    fn own_container_id(&self) -> Option<String>;
}

/// Reads the real process environment and cgroup file.
pub struct HostIntrospection;

impl RuntimeIntrospection for HostIntrospection {
    fn own_container_id(&self) -> Option<String> {
        let hostname = std::env::var("HOSTNAME").ok();
        let cgroup = std::fs::read_to_string("/proc/self/cgroup").ok();
        detect_container_id(hostname.as_deref(), cgroup.as_deref())
    }
}

pub fn detect_container_id(hostname: Option<&str>, cgroup: Option<&str>) -> Option<String> {
    if let Some(h) = hostname.map(str::trim).filter(|h| looks_like_container_id(h)) {
        return Some(h.to_string());
    }
    cgroup.and_then(container_id_from_cgroup)
}

/// First 64-hex-digit path segment in a cgroup file.
pub fn container_id_from_cgroup(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|line| line.rsplit(':').next())
        .flat_map(|path| path.split('/'))
        .map(|segment| {
            let segment = segment.strip_suffix(".scope").unwrap_or(segment);
            segment
                .rsplit_once('-')
                .map(|(_, id)| id)
                .unwrap_or(segment)
        })
        .find(|id| id.len() == 64 && is_hex(id))
        .map(str::to_string)
}

fn looks_like_container_id(s: &str) -> bool {
    (s.len() == 12 || s.len() == 64) && is_hex(s)
}

fn is_hex(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "4f1e6c9b8a7d6e5f4c3b2a1908f7e6d5c4b3a29180f7e6d5c4b3a2918f7e6d5c";

    #[test]
    fn test_hostname_preferred() {
        assert_eq!(
            detect_container_id(Some("4f1e6c9b8a7d"), Some("")).as_deref(),
            Some("4f1e6c9b8a7d")
        );
    }

    #[test]
    fn test_regular_hostname_falls_back_to_cgroup() {
        let cgroup = format!("12:cpuset:/docker/{}\n11:memory:/docker/{}\n", ID, ID);
        assert_eq!(
            detect_container_id(Some("build-agent-01"), Some(&cgroup)).as_deref(),
            Some(ID)
        );
    }

    #[test]
    fn test_systemd_scope_layout() {
        let cgroup = format!("0::/system.slice/docker-{}.scope\n", ID);
        assert_eq!(container_id_from_cgroup(&cgroup).as_deref(), Some(ID));
    }

    #[test]
    fn test_not_in_container() {
        assert_eq!(container_id_from_cgroup("0::/user.slice/user-1000.slice\n"), None);
        assert_eq!(detect_container_id(Some("laptop"), None), None);
    }
}
