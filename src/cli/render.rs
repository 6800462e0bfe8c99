//! CLI subcommand: `sandbox-operator render`
//!
//! Derives every object a manifest would produce, in reconcile order,
//! and prints them. Owner references and store identity are absent.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::builder::{build_discovery_endpoint, build_volume_claim, build_workload};
use crate::config::Config;
use crate::policy::build_policies;
use crate::resources::{Object, Resource};
use crate::spec::Sandbox;

#[derive(Args)]
pub struct RenderArgs {
    /// Sandbox manifest (YAML)
    pub manifest: PathBuf,

    /// Output format: yaml (default) or json
    #[arg(short, long, default_value = "yaml")]
    pub format: String,
}

pub async fn run(args: RenderArgs, config: &Config) -> Result<()> {
    let sandbox = super::load_manifest(&args.manifest, &config.reconcile.namespace)?;
    let objects = render(&sandbox, config)?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&objects)?),
        "yaml" => {
            for object in &objects {
                println!("---");
                print!("{}", serde_yaml::to_string(object)?);
            }
        }
        other => anyhow::bail!("Unknown format: {} (expected yaml or json)", other),
    }
    Ok(())
}

/// Every derived object for `sandbox`. Fails on the first invalid part,
/// since a partial rendering would be misleading.
pub fn render(sandbox: &Sandbox, config: &Config) -> Result<Vec<Object>> {
    let spec = &sandbox.spec;
    let operator = &config.operator;
    sandbox.validate()?;
    let mut objects = Vec::new();

    for (name, volume) in &spec.volumes {
        objects.push(build_volume_claim(sandbox, name, volume, operator).into_object());
    }

    for (name, service) in &spec.services {
        spec.validate_service(sandbox.name(), name, service)?;
        objects.push(build_workload(sandbox, name, service, operator).into_object());
        if service.wants_discovery_endpoint() {
            objects
                .push(build_discovery_endpoint(sandbox, name, service, operator).into_object());
        }
    }

    objects.extend(
        build_policies(sandbox, operator)
            .into_iter()
            .map(Resource::into_object),
    );
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Kind;

    fn manifest(yaml: &str) -> Sandbox {
        super::super::parse_manifest(yaml, "agents").unwrap()
    }

    #[test]
    fn test_render_order_and_kinds() {
        let sandbox = manifest(
            r#"
metadata:
  name: box
spec:
  services:
    web:
      image: nginx
      dnsRecord: true
  networks:
    front: ""
  volumes:
    data:
      size: 1Gi
"#,
        );
        let kinds: Vec<Kind> = render(&sandbox, &Config::default())
            .unwrap()
            .iter()
            .map(Object::kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                Kind::VolumeClaim,
                Kind::Workload,
                Kind::Endpoint,
                Kind::NetworkPolicy,
                Kind::NetworkPolicy,
                Kind::NetworkPolicy,
            ]
        );
    }

    #[test]
    fn test_render_rejects_invalid_service() {
        let sandbox = manifest(
            r#"
metadata:
  name: box
spec:
  services:
    Bad_Name:
      image: nginx
"#,
        );
        assert!(render(&sandbox, &Config::default()).is_err());
    }
}
