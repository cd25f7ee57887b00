//! # TemporaDB Storage
//!
//! The in-memory reference implementation of the ordered key/value
//! interface the index layer runs on. Production deployments swap in a
//! persistent ordered store behind the same [`tempora_core::traits::KvStore`]
//! trait; every test in the workspace runs against [`MemKv`].

mod memkv;

pub use memkv::MemKv;
