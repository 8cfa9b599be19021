//! Integration tests for the resource cache controller
//!
//! Each test runs the controller against an in-memory cluster and observes
//! the cache through its accessors and announcement channels.

use std::sync::Arc;
use std::time::Duration;

use meshplane::config::CacheSettings;
use meshplane::k8s::{
    Announcement, AnnouncementType, CacheController, FakeClusterApi, MeshService, Namespace,
    Resource, ResourceKind, Service, ServicePort,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MESH: &str = "mesh";

async fn start(api: &FakeClusterApi) -> CacheController {
    let controller = CacheController::start(
        MESH,
        Arc::new(api.clone()),
        &CacheSettings::default(),
        CancellationToken::new(),
    );
    controller.wait_for_cache_sync(Duration::from_secs(3)).await.unwrap();
    controller
}

async fn next(rx: &mut mpsc::Receiver<Announcement>) -> Announcement {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting for an announcement")
        .expect("announcement channel closed")
}

fn announced_service(announcement: &Announcement) -> MeshService {
    match announcement.object() {
        Some(Resource::Service(svc)) => svc.mesh_service(),
        other => panic!("expected a service, got {:?}", other),
    }
}

#[tokio::test]
async fn test_list_and_delete_monitored_namespace() {
    let api = FakeClusterApi::new();
    api.create_namespace(Namespace::new("ns-1").monitored_by(MESH)).unwrap();
    let controller = start(&api).await;
    let mut namespaces = controller.get_announcements_channel(ResourceKind::Namespaces);

    assert_eq!(controller.list_monitored_namespaces(), vec!["ns-1"]);
    assert!(controller.get_namespace("ns-1").is_some());

    api.delete_namespace("ns-1").unwrap();
    let deleted = next(&mut namespaces).await;
    assert_eq!(deleted.event, AnnouncementType::Deleted);
    assert!(deleted.new_object.is_none());

    assert!(controller.get_namespace("ns-1").is_none());
    assert!(controller.list_monitored_namespaces().is_empty());
}

#[tokio::test]
async fn test_namespace_of_another_mesh_is_not_monitored() {
    let api = FakeClusterApi::new();
    api.create_namespace(Namespace::new("ns-1").monitored_by("other-mesh")).unwrap();
    let controller = start(&api).await;

    assert!(controller.get_namespace("ns-1").is_some());
    assert!(!controller.is_monitored_namespace("ns-1"));
    assert!(controller.list_monitored_namespaces().is_empty());
}

#[tokio::test]
async fn test_service_lifecycle_is_announced() {
    let api = FakeClusterApi::new();
    api.create_namespace(Namespace::new("ns-1").monitored_by(MESH)).unwrap();
    let controller = start(&api).await;
    let mut services = controller.get_announcements_channel(ResourceKind::Services);

    let svc = Service::new("ns-1", "bookstore")
        .with_port(ServicePort::tcp(8080))
        .with_selector("app", "bookstore");
    api.create_service(svc.clone()).unwrap();

    let added = next(&mut services).await;
    assert_eq!(added.event, AnnouncementType::Added);
    assert_eq!(announced_service(&added), svc.mesh_service());

    let cached = controller.get_service(&svc.mesh_service()).unwrap();
    assert_eq!(cached.spec, svc.spec);

    api.delete_service("ns-1", "bookstore").unwrap();
    let deleted = next(&mut services).await;
    assert_eq!(deleted.event, AnnouncementType::Deleted);
    assert_eq!(announced_service(&deleted), svc.mesh_service());
    assert!(controller.get_service(&svc.mesh_service()).is_none());
}

#[tokio::test]
async fn test_services_removed_one_by_one() {
    let api = FakeClusterApi::new();
    api.create_namespace(Namespace::new("ns-1").monitored_by(MESH)).unwrap();
    api.create_namespace(Namespace::new("ns-2").monitored_by(MESH)).unwrap();
    let listed = [
        ("ns-1", "bookbuyer"),
        ("ns-1", "bookstore"),
        ("ns-2", "bookthief"),
        ("ns-2", "bookwarehouse"),
    ];
    for (ns, name) in listed {
        api.create_service(Service::new(ns, name).with_port(ServicePort::tcp(80))).unwrap();
    }
    let controller = start(&api).await;
    let mut services = controller.get_announcements_channel(ResourceKind::Services);
    assert_eq!(controller.list_services().len(), 4);

    for (removed, (ns, name)) in listed.iter().enumerate() {
        api.delete_service(ns, name).unwrap();
        let deleted = next(&mut services).await;
        assert_eq!(announced_service(&deleted), MeshService::new(*ns, *name));

        let remaining: Vec<MeshService> =
            controller.list_services().iter().map(Service::mesh_service).collect();
        assert_eq!(remaining.len(), listed.len() - removed - 1);
        assert!(!remaining.contains(&MeshService::new(*ns, *name)));
    }
    assert!(controller.list_services_in_namespace("ns-2").is_empty());
}

#[tokio::test]
async fn test_slow_service_consumer_does_not_block_namespace_updates() {
    let api = FakeClusterApi::new();
    api.create_namespace(Namespace::new("ns-1").monitored_by(MESH)).unwrap();
    let controller = CacheController::start(
        MESH,
        Arc::new(api.clone()),
        &CacheSettings { announcement_buffer: 1, ..Default::default() },
        CancellationToken::new(),
    );
    controller.wait_for_cache_sync(Duration::from_secs(3)).await.unwrap();

    // Never drained.
    let _stalled = controller.get_announcements_channel(ResourceKind::Services);
    let mut namespaces = controller.get_announcements_channel(ResourceKind::Namespaces);

    for name in ["a", "b", "c"] {
        api.create_service(Service::new("ns-1", name)).unwrap();
    }
    for team in ["payments", "storefront"] {
        let mut ns = Namespace::new("ns-1").monitored_by(MESH);
        ns.metadata.labels.insert("team".to_string(), team.to_string());
        api.update_namespace(ns).unwrap();

        let event = next(&mut namespaces).await;
        assert_eq!(event.event, AnnouncementType::Updated);
    }

    controller.shutdown().await;
}

#[tokio::test]
async fn test_stalled_service_consumer_does_not_block_membership_changes() {
    let api = FakeClusterApi::new();
    api.create_namespace(Namespace::new("ns-1")).unwrap();
    for name in ["a", "b", "c"] {
        api.create_service(Service::new("ns-1", name)).unwrap();
    }
    let controller = CacheController::start(
        MESH,
        Arc::new(api.clone()),
        &CacheSettings { announcement_buffer: 1, ..Default::default() },
        CancellationToken::new(),
    );
    controller.wait_for_cache_sync(Duration::from_secs(3)).await.unwrap();

    let mut stalled = controller.get_announcements_channel(ResourceKind::Services);
    let mut namespaces = controller.get_announcements_channel(ResourceKind::Namespaces);

    // Joining announces three services into a queue that holds one.
    api.update_namespace(Namespace::new("ns-1").monitored_by(MESH)).unwrap();
    assert_eq!(next(&mut namespaces).await.event, AnnouncementType::Added);

    api.create_namespace(Namespace::new("ns-2").monitored_by(MESH)).unwrap();
    let event = next(&mut namespaces).await;
    assert_eq!(event.event, AnnouncementType::Added);
    assert!(controller.is_monitored_namespace("ns-2"));

    api.delete_namespace("ns-1").unwrap();
    assert_eq!(next(&mut namespaces).await.event, AnnouncementType::Deleted);

    // Draining catches up with every service change, in order.
    let mut events = Vec::new();
    for _ in 0..6 {
        let event = next(&mut stalled).await;
        events.push((event.event, announced_service(&event).name));
    }
    let expected: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|name| (AnnouncementType::Added, name.to_string()))
        .chain(["a", "b", "c"].into_iter().map(|n| (AnnouncementType::Deleted, n.to_string())))
        .collect();
    assert_eq!(events, expected);

    controller.shutdown().await;
}
