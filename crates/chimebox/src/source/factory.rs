//! Builds a pool's provider chain from its configured URI.

use chimeconf::{expand_path, PoolConfig, RefreshConfig, ToolsConfig};
use percent_encoding::percent_decode_str;
use std::time::Duration;
use url::Url;

use super::webdav::Credentials;
use super::{CachingFilter, FileSource, NormalizingFilter, SoundSource, Transcoder, WebDavSource};
use crate::error::{ChimeError, Result};

/// Innermost source for `uri`, without any filters.
pub fn build_source(uri: &str, tools: &ToolsConfig) -> Result<Box<dyn SoundSource>> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(Box::new(FileSource::new(expand_path(path))));
    }

    let url = Url::parse(uri)
        .map_err(|e| ChimeError::Configuration(format!("invalid pool uri {uri}: {e}")))?;

    match url.scheme() {
        "http" | "https" => {
            let credentials = credentials_from(&url)?;
            let mut origin = url.clone();
            // set_username/set_password only fail for cannot-be-a-base urls,
            // which http(s) never is
            let _ = origin.set_username("");
            let _ = origin.set_password(None);
            origin.set_path("/");
            origin.set_query(None);
            origin.set_fragment(None);

            let source = WebDavSource::new(
                origin,
                url.path(),
                credentials,
                Duration::from_secs(tools.fetch_timeout_secs),
            )?;
            Ok(Box::new(source))
        }
        other => Err(ChimeError::Configuration(format!(
            "unsupported uri scheme {other:?} in {uri}"
        ))),
    }
}

/// Source wrapped in the filters the pool asks for.
pub fn build_chain(
    pool: &PoolConfig,
    tools: &ToolsConfig,
    refresh: &RefreshConfig,
) -> Result<Box<dyn SoundSource>> {
    let mut chain = build_source(&pool.uri, tools)?;

    if pool.normalize {
        chain = Box::new(NormalizingFilter::new(chain, Transcoder::from_config(tools)));
    }
    if pool.cache {
        chain = Box::new(CachingFilter::new(chain, refresh.populate_concurrency));
    }

    tracing::debug!(pool = %pool.identifier, chain = %chain.describe(), "built provider chain");
    Ok(chain)
}

fn credentials_from(url: &Url) -> Result<Option<Credentials>> {
    if url.username().is_empty() {
        return Ok(None);
    }

    let decode = |raw: &str| {
        percent_decode_str(raw)
            .decode_utf8()
            .map(|s| s.into_owned())
            .map_err(|e| ChimeError::Configuration(format!("invalid credentials in pool uri: {e}")))
    };

    Ok(Some(Credentials {
        username: decode(url.username())?,
        password: decode(url.password().unwrap_or_default())?,
    }))
}
