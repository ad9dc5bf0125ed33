//! Random file and directory names for scratch artifacts.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of generated names.
pub const NAME_LENGTH: usize = 15;

/// Generate a random alphanumeric name from the thread-local CSPRNG.
pub fn random_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NAME_LENGTH)
        .map(char::from)
        .collect()
}
