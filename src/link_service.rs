use std::sync::Arc;

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    api::{ApiResponse, CreateParams},
    link_repo::{
        InsertError, ShortLink, ShortLinkRepository, StorageError, short_link_repository_capsule,
    },
    short_id,
    validation::{NewShortLink, OutputFormat, ValidationError, Validator, validator_capsule},
};

pub fn link_service_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<dyn LinkService> {
    let validator = Arc::clone(get.as_ref(validator_capsule));
    let link_repo = Arc::clone(get.as_ref(short_link_repository_capsule));
    Arc::new(LinkServiceImpl {
        validator,
        link_repo,
    })
}

#[async_trait]
pub trait LinkService: Send + Sync {
    /// Destination of the link with this ID, if there is one.
    async fn resolve(&self, id: &str) -> Result<Option<String>, StorageError>;

    /// Validates the request and stores a new link on success.
    ///
    /// Validation failures are not errors here; they come back as an error
    /// bundle in the [`CreateOutcome`]. `base_url` is `<scheme>://<host>`.
    async fn create(
        &self,
        params: CreateParams,
        base_url: &str,
    ) -> Result<CreateOutcome, CreateLinkError>;
}

#[derive(Debug, PartialEq, Eq)]
pub struct CreateOutcome {
    pub format: OutputFormat,
    pub response: ApiResponse,
}

#[derive(Debug, Error)]
pub enum CreateLinkError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("exhausted {attempts} attempts to find a free short link ID")]
    IdExhausted { attempts: usize },
}

struct LinkServiceImpl {
    validator: Arc<Validator>,
    link_repo: Arc<dyn ShortLinkRepository>,
}

impl LinkServiceImpl {
    const INSERT_ATTEMPTS: usize = 3;

    /// Inserts under the timestamp ID, falling back to salted variants of it
    /// when another link already took that second.
    async fn insert_with_fresh_id(&self, link: NewShortLink) -> Result<String, CreateLinkError> {
        let base_id = short_id::new_id(OffsetDateTime::now_utc());
        let mut attempt_id = base_id.clone();

        for _ in 0..Self::INSERT_ATTEMPTS {
            match self
                .link_repo
                .insert(ShortLink::new(attempt_id.clone(), link.clone()))
                .await
            {
                Ok(()) => return Ok(attempt_id),
                Err(InsertError::IdTaken) => {
                    warn!(?attempt_id, "Generated short link ID that was already taken");
                }
                Err(InsertError::Storage(err)) => return Err(err.into()),
            }
            attempt_id = short_id::salted_id(&base_id);
        }

        Err(CreateLinkError::IdExhausted {
            attempts: Self::INSERT_ATTEMPTS,
        })
    }
}

#[async_trait]
impl LinkService for LinkServiceImpl {
    #[instrument(skip(self))]
    async fn resolve(&self, id: &str) -> Result<Option<String>, StorageError> {
        Ok(self.link_repo.find_by_id(id).await?.map(|link| link.url))
    }

    #[instrument(skip(self))]
    async fn create(
        &self,
        params: CreateParams,
        base_url: &str,
    ) -> Result<CreateOutcome, CreateLinkError> {
        let format = OutputFormat::from_param(&params.format);

        let response = match self.validator.validate(&params).await {
            Ok(link) => {
                let id = self.insert_with_fresh_id(link).await?;
                info!(id, "Created short link");
                ApiResponse::created(format!("{base_url}/{id}/"))
            }
            Err(err) => {
                info!(?err, "Rejected link parameters");
                ApiResponse::failed(ValidationError::USER_MESSAGE)
            }
        };

        Ok(CreateOutcome { format, response })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use mockall::{mock, predicate::*};
    use sea_orm::DbErr;

    use crate::{
        probe::{MockUrlProber, ProbeError},
        validation::{RedirectTime, RedirectType},
    };

    use super::*;

    mock! {
        ShortLinkRepository {}

        #[async_trait]
        impl ShortLinkRepository for ShortLinkRepository {
            async fn insert(&self, link: ShortLink) -> Result<(), InsertError>;
            async fn find_by_id(&self, id: &str) -> Result<Option<ShortLink>, StorageError>;
        }
    }

    const BASE_URL: &str = "http://short.test";

    fn reachable_prober() -> MockUrlProber {
        let mut prober = MockUrlProber::new();
        prober.expect_probe().returning(|_| Ok(()));
        prober
    }

    fn new_service(prober: MockUrlProber, repo: MockShortLinkRepository) -> LinkServiceImpl {
        LinkServiceImpl {
            validator: Arc::new(Validator::new(Arc::new(prober))),
            link_repo: Arc::new(repo),
        }
    }

    fn example_params(format: &str) -> CreateParams {
        CreateParams {
            url: "https://example.com".to_owned(),
            title: "Example Site".to_owned(),
            format: format.to_owned(),
            ..CreateParams::default()
        }
    }

    fn is_hex_id(id: &str) -> bool {
        !id.is_empty() && id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    }

    #[tokio::test]
    async fn test_resolve_found() {
        let mut repo = MockShortLinkRepository::new();
        repo.expect_find_by_id()
            .with(eq("6553f100"))
            .once()
            .returning(|id| {
                Ok(Some(ShortLink {
                    id: id.to_owned(),
                    url: "https://example.com".to_owned(),
                    title: String::new(),
                    redirect_type: RedirectType::Http,
                    redirect_time: RedirectTime::DEFAULT,
                }))
            });

        let service = new_service(MockUrlProber::new(), repo);
        let url = service.resolve("6553f100").await.unwrap();
        assert_eq!(url.as_deref(), Some("https://example.com"));
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let mut repo = MockShortLinkRepository::new();
        repo.expect_find_by_id().once().returning(|_| Ok(None));

        let service = new_service(MockUrlProber::new(), repo);
        assert_eq!(service.resolve("doesnotexist").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resolve_storage_error() {
        let mut repo = MockShortLinkRepository::new();
        repo.expect_find_by_id()
            .once()
            .returning(|_| Err(StorageError::Query(DbErr::Custom("test error".to_owned()))));

        let service = new_service(MockUrlProber::new(), repo);
        let err = service.resolve("abc").await.unwrap_err();
        assert!(matches!(err, StorageError::Query(_)));
    }

    #[tokio::test]
    async fn test_create_success() {
        let mut repo = MockShortLinkRepository::new();
        repo.expect_insert()
            .withf(|link| {
                is_hex_id(&link.id)
                    && link.url == "https://example.com"
                    && link.title == "ExampleSite"
                    && link.redirect_type == RedirectType::Http
                    && link.redirect_time == RedirectTime::DEFAULT
            })
            .once()
            .returning(|_| Ok(()));

        let service = new_service(reachable_prober(), repo);
        let outcome = service
            .create(example_params("json"), BASE_URL)
            .await
            .unwrap();

        assert_eq!(outcome.format, OutputFormat::Json);
        assert_eq!(outcome.response.error, 0);
        let short_url = outcome.response.url.unwrap();
        let id = short_url
            .strip_prefix("http://short.test/")
            .and_then(|rest| rest.strip_suffix('/'))
            .unwrap();
        assert!(is_hex_id(id));
    }

    #[tokio::test]
    async fn test_create_unknown_format_is_json() {
        let mut repo = MockShortLinkRepository::new();
        repo.expect_insert().once().returning(|_| Ok(()));

        let service = new_service(reachable_prober(), repo);
        let outcome = service
            .create(example_params("yaml"), BASE_URL)
            .await
            .unwrap();
        assert_eq!(outcome.format, OutputFormat::Json);
    }

    #[tokio::test]
    async fn test_create_invalid_url_stores_nothing() {
        let mut prober = MockUrlProber::new();
        prober.expect_probe().never();
        let mut repo = MockShortLinkRepository::new();
        repo.expect_insert().never();

        let service = new_service(prober, repo);
        for url in ["", "   ", "example.com", "javascript:alert(1)"] {
            let outcome = service
                .create(
                    CreateParams {
                        url: url.to_owned(),
                        format: "text".to_owned(),
                        ..CreateParams::default()
                    },
                    BASE_URL,
                )
                .await
                .unwrap();
            assert_eq!(outcome.format, OutputFormat::Text);
            assert_eq!(outcome.response, ApiResponse::failed("Invalid URL."));
        }
    }

    #[tokio::test]
    async fn test_create_unreachable_url_stores_nothing() {
        let mut prober = MockUrlProber::new();
        prober
            .expect_probe()
            .once()
            .returning(|_| Err(ProbeError::EmptyBody));
        let mut repo = MockShortLinkRepository::new();
        repo.expect_insert().never();

        let service = new_service(prober, repo);
        let outcome = service
            .create(example_params("xml"), BASE_URL)
            .await
            .unwrap();
        assert_eq!(outcome.format, OutputFormat::Xml);
        assert_eq!(outcome.response, ApiResponse::failed("Invalid URL."));
    }

    #[tokio::test]
    async fn test_create_retries_with_salted_id_on_collision() {
        let attempted_ids = Arc::new(Mutex::new(Vec::new()));
        let mut repo = MockShortLinkRepository::new();
        repo.expect_insert().times(2).returning({
            let attempted_ids = Arc::clone(&attempted_ids);
            move |link| {
                let mut ids = attempted_ids.lock().unwrap();
                ids.push(link.id);
                if ids.len() == 1 {
                    Err(InsertError::IdTaken)
                } else {
                    Ok(())
                }
            }
        });

        let service = new_service(reachable_prober(), repo);
        let outcome = service
            .create(example_params("json"), BASE_URL)
            .await
            .unwrap();

        let ids = attempted_ids.lock().unwrap().clone();
        assert_eq!(ids.len(), 2);
        assert!(ids[1].starts_with(&ids[0]));
        assert_eq!(ids[1].len(), ids[0].len() + 4);
        assert_eq!(
            outcome.response.url.as_deref(),
            Some(format!("{BASE_URL}/{}/", ids[1]).as_str())
        );
    }

    #[tokio::test]
    async fn test_create_gives_up_after_repeated_collisions() {
        let mut repo = MockShortLinkRepository::new();
        repo.expect_insert()
            .times(LinkServiceImpl::INSERT_ATTEMPTS)
            .returning(|_| Err(InsertError::IdTaken));

        let service = new_service(reachable_prober(), repo);
        let err = service
            .create(example_params("json"), BASE_URL)
            .await
            .unwrap_err();
        assert!(matches!(err, CreateLinkError::IdExhausted { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_create_storage_error_is_not_retried() {
        let mut repo = MockShortLinkRepository::new();
        repo.expect_insert().once().returning(|_| {
            Err(InsertError::Storage(StorageError::Query(DbErr::Custom(
                "disk full".to_owned(),
            ))))
        });

        let service = new_service(reachable_prober(), repo);
        let err = service
            .create(example_params("json"), BASE_URL)
            .await
            .unwrap_err();
        assert!(matches!(err, CreateLinkError::Storage(StorageError::Query(_))));
    }
}
