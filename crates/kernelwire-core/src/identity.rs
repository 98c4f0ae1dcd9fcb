use kernelwire_frame::{new_id, Header};

const FALLBACK_USER: &str = "unspecified user";

/// Identity of one kernel instance.
///
/// The kernel and session ids are generated once; every header the kernel
/// builds carries the session id and user name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelIdentity {
    kernel_id: String,
    session_id: String,
    username: String,
}

impl KernelIdentity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            kernel_id: new_id(),
            session_id: new_id(),
            username: username.into(),
        }
    }

    /// Identity for the user running this process.
    pub fn from_system() -> Self {
        Self::new(system_user_name())
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Broadcast topic for `msg_type`: `kernel_core.<kernel_id>.<msg_type>`.
    pub fn topic(&self, msg_type: &str) -> String {
        format!("kernel_core.{}.{}", self.kernel_id, msg_type)
    }

    /// A fresh header stamped with this session and user.
    pub fn header(&self, msg_type: &str) -> Header {
        Header::new(msg_type, self.session_id.as_str(), self.username.as_str())
    }
}

/// Name of the effective user, from the password database, then `$USER`.
pub fn system_user_name() -> String {
    passwd_user_name()
        .or_else(|| std::env::var("USER").ok().filter(|name| !name.is_empty()))
        .unwrap_or_else(|| FALLBACK_USER.to_string())
}

#[cfg(unix)]
fn passwd_user_name() -> Option<String> {
    use std::ffi::CStr;

    let mut buf = vec![0 as libc::c_char; 4096];
    // SAFETY: an all-zero passwd is a valid value for getpwuid_r to overwrite.
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    // SAFETY: `pwd`, `buf` and `result` are valid writable locations and
    // `buf.len()` is the size of the scratch buffer handed to libc.
    let rc = unsafe {
        libc::getpwuid_r(
            libc::geteuid(),
            &mut pwd,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() || pwd.pw_name.is_null() {
        return None;
    }

    // SAFETY: on success `pw_name` points at a NUL-terminated string inside `buf`,
    // which outlives this borrow.
    let name = unsafe { CStr::from_ptr(pwd.pw_name) }
        .to_string_lossy()
        .into_owned();
    (!name.is_empty()).then_some(name)
}

#[cfg(not(unix))]
fn passwd_user_name() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_fresh_per_identity() {
        let a = KernelIdentity::new("alice");
        let b = KernelIdentity::new("alice");
        assert_ne!(a.kernel_id(), b.kernel_id());
        assert_ne!(a.session_id(), b.session_id());
        assert_ne!(a.kernel_id(), a.session_id());
    }

    #[test]
    fn topic_names_kernel_and_type() {
        let identity = KernelIdentity::new("alice");
        assert_eq!(
            identity.topic("status"),
            format!("kernel_core.{}.status", identity.kernel_id())
        );
    }

    #[test]
    fn header_carries_session_and_user() {
        let identity = KernelIdentity::new("alice");
        let header = identity.header("execute_reply");
        assert_eq!(header.session, identity.session_id());
        assert_eq!(header.username, "alice");
        assert_eq!(header.msg_type, "execute_reply");
    }

    #[test]
    fn system_user_name_is_never_empty() {
        assert!(!system_user_name().is_empty());
    }
}
