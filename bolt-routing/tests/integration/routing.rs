use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use bolt_routing::errors::{ServerError, DATABASE_UNAVAILABLE, NOT_A_LEADER};
use bolt_routing::network::{Bookmarks, Connection, Query};
use bolt_routing::policies::load_balancing::LoadBalancingStrategyKind;
use bolt_routing::{AccessMode, DriverError, LoadBalancer, RoutingConfigBuilder};

use crate::utils::{addr, setup_tracing, MockCluster, Topology};

fn round_robin(cluster: &MockCluster) -> LoadBalancer {
    let config = RoutingConfigBuilder::new()
        .initial_address("seed:7687")
        .load_balancing_strategy(LoadBalancingStrategyKind::RoundRobin)
        .build()
        .unwrap();
    LoadBalancer::new(config, cluster.factory())
}

fn small_cluster(ttl: i64) -> MockCluster {
    let cluster = MockCluster::new();
    cluster.router(
        "seed",
        Topology::new(ttl)
            .routers(&["seed"])
            .writers(&["w1", "w2"])
            .readers(&["r1"]),
    );
    cluster.servers(&["w1", "w2", "w3", "r1"]);
    cluster
}

async fn write(lb: &LoadBalancer, text: &str) -> Result<(), DriverError> {
    let mut connection = lb
        .acquire_connection(AccessMode::Write, "", &Bookmarks::empty())
        .await?;
    let result = connection.run(Query::new(text)).await;
    connection.close().await;
    result.map(|_| ())
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn routes_writes_and_reads_to_their_roles() {
    setup_tracing();
    let cluster = small_cluster(300);
    let lb = round_robin(&cluster);

    write(&lb, "CREATE (:A)").await.unwrap();
    write(&lb, "CREATE (:B)").await.unwrap();
    let mut reader = lb
        .acquire_connection(AccessMode::Read, "", &Bookmarks::empty())
        .await
        .unwrap();
    reader.run(Query::new("MATCH (n) RETURN n")).await.unwrap();

    let table = lb.routing_table_for("").unwrap();
    assert_eq!(table.writers().len(), 2);
    assert_eq!(*table.readers(), vec![addr("r1")]);
    assert_eq!(cluster.queries("w1"), vec![("CREATE (:A)".to_owned(), AccessMode::Write)]);
    assert_eq!(cluster.queries("w2"), vec![("CREATE (:B)".to_owned(), AccessMode::Write)]);
    assert_eq!(
        cluster.queries("r1"),
        vec![("MATCH (n) RETURN n".to_owned(), AccessMode::Read)]
    );
    assert_eq!(cluster.discoveries("seed").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn rediscovers_once_the_table_expires() {
    setup_tracing();
    let cluster = small_cluster(10);
    let lb = round_robin(&cluster);

    write(&lb, "CREATE (:A)").await.unwrap();
    tokio::time::advance(Duration::from_secs(5)).await;
    write(&lb, "CREATE (:B)").await.unwrap();
    assert_eq!(cluster.discoveries("seed").len(), 1);

    cluster.router(
        "seed",
        Topology::new(10)
            .routers(&["seed"])
            .writers(&["w3"])
            .readers(&["r1"]),
    );
    tokio::time::advance(Duration::from_secs(6)).await;
    write(&lb, "CREATE (:C)").await.unwrap();

    assert_eq!(cluster.discoveries("seed").len(), 2);
    assert_eq!(cluster.queries("w3").len(), 1);
    assert_eq!(*lb.routing_table_for("").unwrap().writers(), vec![addr("w3")]);
    // Servers no table mentions anymore lose their pools.
    let pooled = lb.connection_pools().addresses();
    assert!(!pooled.contains(&addr("w1")));
    assert!(pooled.contains(&addr("w3")));
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn former_leader_is_only_removed_from_writers() {
    setup_tracing();
    let cluster = MockCluster::new();
    cluster.router(
        "seed",
        Topology::new(300)
            .routers(&["seed"])
            .writers(&["w1", "w2"])
            .readers(&["w1", "r1"]),
    );
    cluster.servers(&["w1", "w2", "r1"]);
    let lb = round_robin(&cluster);

    cluster.fail_next_query("w1", ServerError::new(NOT_A_LEADER, "No write operations").into());
    assert_matches!(
        write(&lb, "CREATE ()").await,
        Err(DriverError::SessionExpired(msg)) if msg.contains("w1:7687")
    );

    let table = lb.routing_table_for("").unwrap();
    assert_eq!(*table.writers(), vec![addr("w2")]);
    assert_eq!(*table.readers(), vec![addr("w1"), addr("r1")]);
    assert!(lb.connection_pools().addresses().contains(&addr("w1")));

    write(&lb, "CREATE ()").await.unwrap();
    assert_eq!(cluster.queries("w2").len(), 1);
    assert_eq!(cluster.discoveries("seed").len(), 1);
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn broken_connection_forgets_server() {
    setup_tracing();
    let cluster = small_cluster(300);
    let lb = round_robin(&cluster);

    let mut connection = lb
        .acquire_connection(AccessMode::Write, "", &Bookmarks::empty())
        .await
        .unwrap();
    assert_eq!(connection.address(), &addr("w1"));
    cluster.take_down("w1");

    assert_matches!(
        connection.run(Query::new("CREATE ()")).await,
        Err(DriverError::SessionExpired(_))
    );
    connection.close().await;

    assert_eq!(*lb.routing_table_for("").unwrap().writers(), vec![addr("w2")]);
    assert!(!lb.connection_pools().addresses().contains(&addr("w1")));
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn unavailable_database_is_surfaced_as_transient() {
    setup_tracing();
    let cluster = small_cluster(300);
    let lb = round_robin(&cluster);

    cluster.fail_next_query(
        "w1",
        ServerError::new(DATABASE_UNAVAILABLE, "Database is busy doing store copy").into(),
    );
    assert_matches!(
        write(&lb, "CREATE ()").await,
        Err(e) if e.is_transient_error()
    );
    assert_eq!(*lb.routing_table_for("").unwrap().writers(), vec![addr("w2")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(10000)]
async fn concurrent_callers_share_one_discovery() {
    setup_tracing();
    let cluster = small_cluster(300);
    cluster.slow_discovery("seed", Duration::from_millis(100));
    let lb = Arc::new(round_robin(&cluster));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let lb = Arc::clone(&lb);
            tokio::spawn(async move {
                lb.acquire_connection(AccessMode::Read, "", &Bookmarks::empty())
                    .await
                    .map(|connection| connection.address().clone())
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), addr("r1"));
    }

    assert_eq!(cluster.discoveries("seed").len(), 1);
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn disposed_load_balancer_refuses_work() {
    setup_tracing();
    let cluster = small_cluster(300);
    let lb = round_robin(&cluster);
    write(&lb, "CREATE ()").await.unwrap();

    lb.dispose().await;

    assert_matches!(write(&lb, "CREATE ()").await, Err(DriverError::InvalidOperation(_)));
    assert!(lb.connection_pools().addresses().is_empty());
}
