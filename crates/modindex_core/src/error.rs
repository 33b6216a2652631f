use thiserror::Error;

/// Per-item resolution failure. The batch resolver catches these at the item
/// boundary; none of them abort a run.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("could not list repository contents: HTTP {status} from {url}")]
    Listing { url: String, status: u16 },

    #[error("could not fetch file: HTTP {status} from {url}")]
    Fetch { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("could not determine repository host: {repo}")]
    RepositoryHost { repo: String },

    #[error("descriptor has no repo url")]
    MissingRepo,

    #[error("could not determine meta info")]
    MetaUndetermined,

    #[error("could not determine id")]
    MissingId,

    #[error("failed to read descriptor {path}: {message}")]
    Descriptor { path: String, message: String },
}

impl ResolveError {
    /// Transport failures come from the remote side; everything else is a
    /// problem with the item's own data.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Listing { .. } | Self::Fetch { .. } | Self::Request { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ResolveError;

    #[test]
    fn listing_error_carries_url_and_status() {
        let error = ResolveError::Listing {
            url: "https://api.github.com/repos/acme/foo/contents".to_string(),
            status: 404,
        };
        let message = error.to_string();
        assert!(message.starts_with("could not list repository contents"));
        assert!(message.contains("404"));
        assert!(message.contains("acme/foo"));
        assert!(error.is_transport());
    }

    #[test]
    fn shape_errors_are_not_transport() {
        assert!(!ResolveError::MissingId.is_transport());
        assert!(
            !ResolveError::RepositoryHost {
                repo: "ftp://x".to_string()
            }
            .is_transport()
        );
    }
}
