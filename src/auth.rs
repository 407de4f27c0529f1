//! Auth-domain identifiers, grant documents, and redacted secrets.

pub mod grant;
pub mod id;
pub mod token;

pub use grant::*;
pub use id::*;
pub use token::secret::*;
