use eokg_common::AppConfig;
use neo4rs::{ConfigBuilder, Graph};

/// Owns the bolt connection pool. Every store transaction checks out one
/// connection and returns it on commit or rollback.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) graph: Graph,
}

impl GraphClient {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, neo4rs::Error> {
        Self::connect_with_pool(uri, user, password, eokg_common::config::DEFAULT_NEO4J_MAX_CONNECTIONS).await
    }

    /// Connect using the credentials and pool size from the environment config.
    pub async fn from_config(config: &AppConfig) -> Result<Self, neo4rs::Error> {
        Self::connect_with_pool(
            &config.neo4j_uri,
            &config.neo4j_user,
            &config.neo4j_password,
            config.neo4j_max_connections,
        )
        .await
    }

    pub async fn connect_with_pool(
        uri: &str,
        user: &str,
        password: &str,
        max_connections: usize,
    ) -> Result<Self, neo4rs::Error> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(500)
            .max_connections(max_connections)
            .build()?;
        Ok(Self {
            graph: Graph::connect(config).await?,
        })
    }
}
