//! The four probe groups (spec.md §4.3-§4.6), each a [`crate::group::TestGroup`]
//! implementation wired into the static registry in [`crate::scheduler`].

pub mod dns;
pub mod route;
pub mod tcp;
pub mod tls;
