use hazelcast_operator::crds::{hazelcast::Hazelcast, hot_backup::HotBackup, map::Map};
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = vec![Hazelcast::crd(), HotBackup::crd(), Map::crd()];
    for (i, crd) in crds.into_iter().enumerate() {
        if i > 0 {
            println!("---");
        }
        println!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
