//! DIS wire encoding for select requests, attribute lists and batch replies.
//!
//! - [`dis`]: the primitive codec. Unsigned integers are `+digits` with a
//!   recursive digit-count prefix; strings are a length then raw bytes.
//! - [`attropl`]: counted attribute lists, and the `Variable_List`
//!   aggregation applied to job submissions.
//! - [`request`]: select request framing (header, criteria, extension).
//! - [`reply`]: select / status reply framing.

pub mod attropl;
pub mod dis;
pub mod reply;
pub mod request;

pub use attropl::{build_var_list, decode_attr_list, encode_attr_list, encode_job_attrs};
pub use dis::{DisError, DisReader, DisWriter};
pub use reply::{decode_reply, encode_error, encode_reply, ReplyFrame};
pub use request::{decode_select_request, encode_select_request};
