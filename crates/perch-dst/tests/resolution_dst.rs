//! DST tests for resolution and snapshot diffing
//!
//! TigerStyle: Deterministic testing of what clients observe:
//!
//! - Resolution of `svc` never includes instances of `svc-2`
//! - Instances appear and disappear in successive diffs
//! - A dead process disappears once its lease expires

use perch_dst::{FaultConfig, FaultType, SimConfig, Simulation};
use perch_registry::{
    diff, CoordinationStore, Endpoint, InstanceRecord, RegistrationInfo, Registry, RegistryError,
    Resolver, RetryPolicy, StoreOp,
};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

fn info(service: &str, address: &str) -> RegistrationInfo {
    RegistrationInfo::new(service, Endpoint::tcp(address))
}

#[test]
fn test_service_prefix_boundary() {
    let result = Simulation::new(SimConfig::new(21)).run(|env| async move {
        let registry = env.registry(RetryPolicy::new());
        registry.register(&info("svc", "10.0.0.1:80")).await?;
        registry.register(&info("svc", "10.0.0.2:80")).await?;
        registry.register(&info("svc-2", "10.0.0.9:80")).await?;

        let resolver = env.resolver();
        let svc = resolver.resolve("svc").await?;
        let addresses: Vec<_> = svc.instances.iter().map(|i| i.address.as_str()).collect();
        assert_eq!(addresses, vec!["10.0.0.1:80", "10.0.0.2:80"]);

        let svc2 = resolver.resolve("svc-2").await?;
        assert_eq!(svc2.instances.len(), 1);
        assert_eq!(svc2.instances[0].address, "10.0.0.9:80");
        Ok(())
    });
    assert!(result.is_ok(), "{:?}", result.err());
}

#[test]
fn test_wildcard_registration_resolves_to_interface_address() {
    let config = SimConfig::new(22).with_local_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 7, 20)));
    let result = Simulation::new(config).run(|env| async move {
        let registry = env.registry(RetryPolicy::new());
        registry.register(&info("hello", ":8888")).await?;
        registry.register(&info("hello", "[::]:9999")).await?;

        let resolved = env.resolver().resolve("hello").await?;
        let addresses: Vec<_> = resolved
            .instances
            .iter()
            .map(|i| i.address.as_str())
            .collect();
        assert_eq!(addresses, vec!["192.168.7.20:8888", "192.168.7.20:9999"]);
        Ok(())
    });
    assert!(result.is_ok(), "{:?}", result.err());
}

#[test]
fn test_diff_follows_membership() {
    let result = Simulation::new(SimConfig::new(23)).run(|env| async move {
        let registry = env.registry(RetryPolicy::new());
        let resolver = env.resolver();
        let a = info("svc", "10.0.0.1:80");
        let b = info("svc", "10.0.0.2:80");

        registry.register(&a).await?;
        let first = resolver.resolve("svc").await?;

        let (change, has_changes) = resolver.diff("svc", &first, &first);
        assert!(!has_changes);
        assert!(change.is_empty());

        registry.register(&b).await?;
        let second = resolver.resolve("svc").await?;
        let (change, has_changes) = resolver.diff("svc", &first, &second);
        assert!(has_changes);
        assert_eq!(change.added.len(), 1);
        assert_eq!(change.added[0].address, "10.0.0.2:80");
        assert!(change.removed.is_empty());

        registry.register(&a.clone().with_weight(50)).await?;
        let third = resolver.resolve("svc").await?;
        let (change, _) = resolver.diff("svc", &second, &third);
        assert_eq!(change.updated.len(), 1);
        assert_eq!(change.updated[0].weight, 50);

        registry.deregister(&b).await?;
        let fourth = resolver.resolve("svc").await?;
        let (change, _) = diff("svc", &third, &fourth);
        assert_eq!(change.removed.len(), 1);
        assert_eq!(change.removed[0].address, "10.0.0.2:80");
        assert_eq!(change.result, fourth);
        Ok(())
    });
    assert!(result.is_ok(), "{:?}", result.err());
}

#[test]
fn test_default_weight_applied() {
    let result = Simulation::new(SimConfig::new(24)).run(|env| async move {
        let registry = env.registry(RetryPolicy::new());
        registry.register(&info("svc", "10.0.0.1:80")).await?;

        let resolved = env.resolver().resolve("svc").await?;
        assert_eq!(resolved.instances[0].weight, 10);

        let resolved = env
            .resolver()
            .with_default_weight(3)
            .resolve("svc")
            .await?;
        assert_eq!(resolved.instances[0].weight, 3);
        Ok(())
    });
    assert!(result.is_ok(), "{:?}", result.err());
}

#[test]
fn test_corrupt_entries_skipped() {
    let result = Simulation::new(SimConfig::new(25)).run(|env| async move {
        let registry = env.registry(RetryPolicy::new());
        registry.register(&info("svc", "10.0.0.1:80")).await?;

        let lease = env.memory.grant_lease(60).await?;
        env.memory
            .put("perch/registry/svc/10.0.0.2:80", b"{broken".to_vec(), lease)
            .await?;
        let record = InstanceRecord::new("tcp", "10.0.0.3:80", 0, BTreeMap::new());
        env.memory
            .put("perch/registry/svc/", record.encode()?, lease)
            .await?;

        let resolved = env.resolver().resolve("svc").await?;
        assert_eq!(resolved.instances.len(), 1);
        assert_eq!(resolved.instances[0].address, "10.0.0.1:80");
        Ok(())
    });
    assert!(result.is_ok(), "{:?}", result.err());
}

#[test]
fn test_dead_instance_disappears_after_ttl() {
    // Coarse steps still renew the survivor's lease every ttl/3
    let config = SimConfig::new(26).with_step_ms(5_000);
    let result = Simulation::new(config).run(|env| async move {
        let survivor = env.registry(RetryPolicy::new());
        let victim = env.registry(RetryPolicy::new());
        survivor.register(&info("svc", "10.0.0.1:80")).await?;
        victim.register(&info("svc", "10.0.0.2:80")).await?;
        env.settle().await;

        let resolver = env.resolver();
        let before = resolver.resolve("svc").await?;
        assert_eq!(before.instances.len(), 2);

        drop(victim);
        env.advance_ms(90_000).await;

        let after = resolver.resolve("svc").await?;
        let (change, has_changes) = resolver.diff("svc", &before, &after);
        assert!(has_changes);
        assert_eq!(change.removed.len(), 1);
        assert_eq!(change.removed[0].address, "10.0.0.2:80");
        Ok(())
    });
    assert!(result.is_ok(), "{:?}", result.err());
}

#[test]
fn test_store_failure_is_retriable() {
    let result = Simulation::new(SimConfig::new(27)).run(|env| async move {
        let registry = env.registry(RetryPolicy::new());
        registry.register(&info("svc", "10.0.0.1:80")).await?;

        env.faults
            .register(FaultConfig::always(FaultType::Timeout).with_filter(StoreOp::Get));
        let err = env.resolver().resolve("svc").await.unwrap_err();
        assert!(err.is_retriable());
        assert!(matches!(err, RegistryError::Store { .. }));

        env.faults.clear();
        assert_eq!(env.resolver().resolve("svc").await?.instances.len(), 1);
        Ok(())
    });
    assert!(result.is_ok(), "{:?}", result.err());
}
