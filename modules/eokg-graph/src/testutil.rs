//! Throwaway Neo4j with the Graph Data Science plugin, for integration tests.

use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

use crate::GraphClient;

const BOLT_PORT: u16 = 7687;
const PASSWORD: &str = "eokg-test";

/// Dropping the returned container stops Neo4j, so keep it bound for the whole test.
pub async fn neo4j_container() -> (ContainerAsync<GenericImage>, GraphClient) {
    let container = GenericImage::new("neo4j", "5.25.1")
        .with_exposed_port(ContainerPort::Tcp(BOLT_PORT))
        .with_wait_for(WaitFor::message_on_stdout("Started."))
        .with_env_var("NEO4J_AUTH", format!("neo4j/{PASSWORD}"))
        .with_env_var("NEO4J_PLUGINS", "[\"graph-data-science\"]")
        .with_env_var("NEO4J_dbms_security_procedures_unrestricted", "gds.*")
        .start()
        .await
        .expect("Neo4j container should start");

    let port = container
        .get_host_port_ipv4(BOLT_PORT)
        .await
        .expect("bolt port should be mapped");
    let client = GraphClient::connect_with_pool(&format!("bolt://127.0.0.1:{port}"), "neo4j", PASSWORD, 4)
        .await
        .expect("Neo4j should accept the test credentials");

    (container, client)
}
