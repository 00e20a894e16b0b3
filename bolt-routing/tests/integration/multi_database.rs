use std::time::Duration;

use bolt_routing::network::{Bookmarks, ServerVersion, Value};
use bolt_routing::{AccessMode, LoadBalancer, RoutingConfigBuilder};

use crate::utils::{addr, setup_tracing, MockCluster, Topology};

fn load_balancer(cluster: &MockCluster) -> LoadBalancer {
    let config = RoutingConfigBuilder::new()
        .initial_address("seed")
        .routing_context_entry("region", "europe")
        .build()
        .unwrap();
    LoadBalancer::new(config, cluster.factory())
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn each_database_has_its_own_table() {
    setup_tracing();
    let cluster = MockCluster::new();
    cluster.router("seed", Topology::new(300).routers(&["seed"]).writers(&["w1"]));
    cluster.router_for("seed", "movies", Topology::new(300).routers(&["seed"]).writers(&["m1"]));
    cluster.servers(&["w1", "m1"]);
    let lb = load_balancer(&cluster);
    let bookmarks = Bookmarks::from_values(["bookmark:1"]);

    let movies = lb
        .acquire_connection(AccessMode::Write, "movies", &bookmarks)
        .await
        .unwrap();
    let default = lb
        .acquire_connection(AccessMode::Write, "", &Bookmarks::empty())
        .await
        .unwrap();

    assert_eq!(movies.address(), &addr("m1"));
    assert_eq!(movies.database(), "movies");
    assert_eq!(default.address(), &addr("w1"));
    assert_eq!(*lb.routing_table_for("movies").unwrap().writers(), vec![addr("m1")]);

    let discoveries = cluster.discoveries("seed");
    assert_eq!(discoveries.len(), 2);
    assert_eq!(discoveries[0].database.as_deref(), Some("system"));
    assert_eq!(discoveries[0].parameters.get("database"), Some(&Value::from("movies")));
    assert_eq!(discoveries[0].bookmarks, bookmarks);
    assert_eq!(discoveries[1].parameters.get("database"), Some(&Value::Null));
    let context = discoveries[1].parameters.get("context").and_then(Value::as_map).unwrap();
    assert_eq!(context.get("region"), Some(&Value::from("europe")));
}

#[tokio::test(start_paused = true)]
async fn unused_database_table_is_purged() {
    setup_tracing();
    let cluster = MockCluster::new();
    cluster.router("seed", Topology::new(1000).routers(&["seed"]).writers(&["w1"]));
    cluster.router_for("seed", "movies", Topology::new(10).routers(&["seed"]).writers(&["m1"]));
    cluster.servers(&["w1", "m1"]);
    let lb = load_balancer(&cluster);

    lb.acquire_connection(AccessMode::Write, "movies", &Bookmarks::empty())
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(10 + 31)).await;
    lb.acquire_connection(AccessMode::Write, "", &Bookmarks::empty())
        .await
        .unwrap();

    assert!(lb.routing_table_for("movies").is_none());
    assert!(!lb.connection_pools().addresses().contains(&addr("m1")));
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn older_servers_use_single_database_procedure() {
    setup_tracing();
    let cluster = MockCluster::new();
    cluster.router("seed", Topology::new(300).routers(&["seed"]).readers(&["r1"]));
    cluster.set_version("seed", ServerVersion::new(3, 5));
    cluster.server("r1");
    let lb = load_balancer(&cluster);

    assert!(!lb.supports_multi_db().await.unwrap());
    lb.acquire_connection(AccessMode::Read, "", &Bookmarks::empty())
        .await
        .unwrap();

    let discoveries = cluster.discoveries("seed");
    assert_eq!(
        discoveries[0].text,
        "CALL dbms.cluster.routing.getRoutingTable($context)"
    );
    assert_eq!(discoveries[0].database, None);
    assert!(!discoveries[0].parameters.contains_key("database"));
}
