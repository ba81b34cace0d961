//! Caller identity supplied to the pipeline.
//!
//! The pipeline stamps every event with the posting viewer and every batch
//! with a per-install device id. Hosts that resolve identity once at startup
//! use [`StaticIdentity`]; hosts with live auth state implement
//! [`IdentitySource`] themselves.

use rand::Rng;

/// Where the pipeline learns who is posting.
pub trait IdentitySource: Send + Sync {
    /// Current viewer id, when a user is authenticated.
    fn viewer_id(&self) -> Option<String>;

    /// Stable per-install device id.
    fn device_id(&self) -> String;
}

/// Fixed identity resolved once at construction.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    viewer: Option<String>,
    device: String,
}

impl StaticIdentity {
    /// Identity with a known viewer and device.
    #[must_use]
    pub fn new(viewer: Option<String>, device: String) -> Self {
        Self { viewer, device }
    }

    /// Logged-out identity with a freshly generated device id.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(None, generate_device_id())
    }
}

impl IdentitySource for StaticIdentity {
    fn viewer_id(&self) -> Option<String> {
        self.viewer.clone()
    }

    fn device_id(&self) -> String {
        self.device.clone()
    }
}

/// Generate a device id: eight random 32-bit words rendered in base 36.
#[must_use]
pub fn generate_device_id() -> String {
    let mut rng = rand::rng();
    let mut id = String::new();
    for _ in 0..8 {
        push_base36(&mut id, rng.random::<u32>());
    }
    id
}

/// Generate a short page-instance id: six random base-36 characters.
///
/// Distinguishes concurrent instances sharing one storage area; uniqueness
/// only has to hold across the handful of pages a user keeps open.
#[must_use]
pub fn generate_page_id() -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    (0..6)
        .map(|_| char::from(DIGITS[rng.random_range(0..DIGITS.len())]))
        .collect()
}

fn push_base36(out: &mut String, mut n: u32) {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        out.push('0');
        return;
    }
    let mut buf = [0_u8; 7];
    let mut at = buf.len();
    while n > 0 {
        at -= 1;
        buf[at] = DIGITS[(n % 36) as usize];
        n /= 36;
    }
    for &b in &buf[at..] {
        out.push(char::from(b));
    }
}
