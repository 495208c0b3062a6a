//! Loads the target list from a JSON manifest.

use crate::target::{ActionTarget, CommandTarget, Registry};
use anyhow::{anyhow, bail};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    targets: Vec<TargetDecl>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetDecl {
    /// Output file.  Alternative to `name`.
    out: Option<String>,
    name: Option<String>,
    command: Option<String>,
    #[serde(default)]
    inputs: Vec<String>,
    depfile: Option<String>,
    description: Option<String>,
    #[serde(default)]
    restart: bool,
}

impl TargetDecl {
    fn into_registry(self, registry: &mut Registry) -> anyhow::Result<()> {
        let name = match (self.out, self.name) {
            (Some(_), Some(_)) => bail!("target has both 'out' and 'name'"),
            (Some(name), None) | (None, Some(name)) => name,
            (None, None) => bail!("target needs 'out' or 'name'"),
        };
        match (self.command, self.restart) {
            (Some(_), true) => bail!("{}: 'command' and 'restart' are exclusive", name),
            (None, false) => bail!("{}: needs 'command' or 'restart'", name),
            (Some(command), false) => {
                let mut target = CommandTarget::new(name, command).inputs(self.inputs);
                if let Some(depfile) = self.depfile {
                    target = target.depfile(depfile);
                }
                if let Some(desc) = self.description {
                    target = target.desc(desc);
                }
                registry.push(target);
            }
            (None, true) => {
                if self.depfile.is_some() {
                    bail!("{}: 'depfile' needs a 'command'", name);
                }
                registry.push(ActionTarget::restart(name, self.inputs));
            }
        }
        Ok(())
    }
}

pub fn parse(text: &str) -> anyhow::Result<Registry> {
    let manifest: Manifest = serde_json::from_str(text)?;
    let mut registry = Registry::new();
    for decl in manifest.targets {
        decl.into_registry(&mut registry)?;
    }
    Ok(registry)
}

pub fn load(path: &str) -> anyhow::Result<Registry> {
    let text = std::fs::read_to_string(path).map_err(|err| anyhow!("read {}: {}", path, err))?;
    parse(&text).map_err(|err| anyhow!("{}: {}", path, err))
}
