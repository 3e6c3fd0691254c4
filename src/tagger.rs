//! Tag writing boundary.
//!
//! Taggers are called only after a file is complete and closed. Writing
//! actual ID3 or FLAC tags is left to implementations outside this crate;
//! [`NoopTagger`] leaves files untouched.

use std::{future::Future, path::Path};

use bytes::Bytes;

use crate::{error::Result, track::Track};

pub trait Tagger: Send + Sync {
    fn tag(
        &self,
        path: &Path,
        track: &Track,
        artwork: Option<Bytes>,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct NoopTagger;

impl Tagger for NoopTagger {
    async fn tag(&self, path: &Path, track: &Track, _artwork: Option<Bytes>) -> Result<()> {
        trace!("not tagging {} for {track}", path.display());
        Ok(())
    }
}
