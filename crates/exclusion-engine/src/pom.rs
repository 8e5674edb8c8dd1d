//! Loading a configuration hierarchy from Maven `pom.xml` files.
//!
//! Every directory holding a `pom.xml` is a unit. Its parent is the nearest
//! ancestor directory that also holds one.

use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use crate::error::{ExclusionError, Result};
use crate::hierarchy::{ConfigHierarchy, ConfigUnit, PluginBlock, UnitPath};
use crate::plugins::{PluginKey, MAVEN_PLUGINS_GROUP};
use crate::resolver::walk_source_tree;

pub const POM_FILE: &str = "pom.xml";

const DECLARED: &[&str] = &["project", "build", "plugins"];
const MANAGED: &[&str] = &["project", "build", "pluginManagement", "plugins"];
const PROFILE_DECLARED: &[&str] = &["project", "profiles", "profile", "build", "plugins"];
const PROFILE: &[&str] = &["project", "profiles", "profile"];
const PROFILE_ID: &[&str] = &["project", "profiles", "profile", "id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Declared,
    Managed,
    Profile,
}

#[derive(Debug)]
struct PluginDraft {
    section: Section,
    depth: usize,
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    excludes: Vec<String>,
}

impl PluginDraft {
    fn finish(self) -> Option<(Section, PluginBlock)> {
        let artifact_id = self.artifact_id?;
        let group_id = self
            .group_id
            .unwrap_or_else(|| MAVEN_PLUGINS_GROUP.to_string());
        let mut block =
            PluginBlock::new(PluginKey::new(group_id, artifact_id)).with_excludes(self.excludes);
        block.version = self.version;
        Some((self.section, block))
    }
}

/// Plugin blocks read from one pom.
#[derive(Debug, Default)]
struct PomPlugins {
    declared: Vec<PluginBlock>,
    managed: Vec<PluginBlock>,
}

/// Build the hierarchy for every `pom.xml` under `root`.
pub fn load_hierarchy(root: &Path) -> Result<ConfigHierarchy> {
    let mut pom_dirs: Vec<PathBuf> = walk_source_tree(root)?
        .into_iter()
        .filter(|p| p.file_name().map(|n| n == POM_FILE).unwrap_or(false))
        .filter_map(|p| {
            p.parent()
                .and_then(|d| d.strip_prefix(root).ok())
                .map(Path::to_path_buf)
        })
        .collect();
    pom_dirs.sort();

    let mut hierarchy = ConfigHierarchy::new();
    for dir in &pom_dirs {
        let parent = dir
            .ancestors()
            .skip(1)
            .find(|candidate| pom_dirs.iter().any(|d| d.as_path() == *candidate))
            .map(UnitPath::from_dir);

        let pom_path = root.join(dir).join(POM_FILE);
        let text = std::fs::read_to_string(&pom_path)?;
        let plugins = parse_pom(&pom_path, &text)?;

        let mut unit = ConfigUnit::new(UnitPath::from_dir(dir), parent);
        unit.declared = plugins.declared;
        unit.managed = plugins.managed;
        debug!(
            unit = %unit.path,
            declared = unit.declared.len(),
            managed = unit.managed.len(),
            "Loaded configuration unit"
        );
        hierarchy.insert(unit)?;
    }

    Ok(hierarchy)
}

fn pom_error(path: &Path, reason: impl ToString) -> ExclusionError {
    ExclusionError::Pom {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn parse_pom(path: &Path, text: &str) -> Result<PomPlugins> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut out = PomPlugins::default();
    let mut stack: Vec<String> = Vec::new();
    let mut draft: Option<PluginDraft> = None;
    let mut profile_id: Option<String> = None;
    let mut profile_blocks: Vec<PluginBlock> = Vec::new();

    loop {
        match reader.read_event().map_err(|e| pom_error(path, e))? {
            Event::Eof => break,
            Event::Start(e) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                open_element(&stack, &mut draft);
            }
            Event::Empty(e) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                open_element(&stack, &mut draft);
                close_element(
                    &stack,
                    &mut draft,
                    &mut out,
                    &mut profile_id,
                    &mut profile_blocks,
                );
                stack.pop();
            }
            Event::End(_) => {
                close_element(
                    &stack,
                    &mut draft,
                    &mut out,
                    &mut profile_id,
                    &mut profile_blocks,
                );
                stack.pop();
            }
            Event::Text(t) => {
                let value = t.unescape().map_err(|e| pom_error(path, e))?.into_owned();
                element_text(&stack, &mut draft, &mut profile_id, value);
            }
            _ => {}
        }
    }

    Ok(out)
}

fn open_element(stack: &[String], draft: &mut Option<PluginDraft>) {
    if draft.is_some() || stack.last().map(String::as_str) != Some("plugin") {
        return;
    }
    let container = &stack[..stack.len() - 1];
    let section = if container == DECLARED {
        Section::Declared
    } else if container == MANAGED {
        Section::Managed
    } else if container == PROFILE_DECLARED {
        Section::Profile
    } else {
        return;
    };
    *draft = Some(PluginDraft {
        section,
        depth: stack.len(),
        group_id: None,
        artifact_id: None,
        version: None,
        excludes: Vec::new(),
    });
}

fn element_text(
    stack: &[String],
    draft: &mut Option<PluginDraft>,
    profile_id: &mut Option<String>,
    value: String,
) {
    if stack == PROFILE_ID {
        *profile_id = Some(value);
        return;
    }
    let Some(d) = draft.as_mut() else {
        return;
    };
    let relative = &stack[d.depth..];
    match relative {
        [leaf] if leaf == "groupId" => d.group_id = Some(value),
        [leaf] if leaf == "artifactId" => d.artifact_id = Some(value),
        [leaf] if leaf == "version" => d.version = Some(value),
        [config, list, leaf]
            if config == "configuration" && list == "excludes" && leaf == "exclude" =>
        {
            d.excludes.push(value)
        }
        _ => {}
    }
}

fn close_element(
    stack: &[String],
    draft: &mut Option<PluginDraft>,
    out: &mut PomPlugins,
    profile_id: &mut Option<String>,
    profile_blocks: &mut Vec<PluginBlock>,
) {
    if draft.as_ref().map(|d| d.depth) == Some(stack.len()) {
        if let Some((section, block)) = draft.take().and_then(PluginDraft::finish) {
            match section {
                Section::Declared => out.declared.push(block),
                Section::Managed => out.managed.push(block),
                Section::Profile => profile_blocks.push(block),
            }
        }
        return;
    }

    if stack == PROFILE {
        // The id may follow the build section, so it is attached on close.
        let id = profile_id.take().unwrap_or_else(|| "default".to_string());
        for block in profile_blocks.drain(..) {
            out.declared.push(block.in_profile(id.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ROOT_POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <modelVersion>4.0.0</modelVersion>
  <build>
    <pluginManagement>
      <plugins>
        <plugin>
          <artifactId>maven-surefire-plugin</artifactId>
          <version>3.0.0</version>
          <configuration>
            <excludes>
              <exclude>**/Slow*.java</exclude>
            </excludes>
          </configuration>
        </plugin>
      </plugins>
    </pluginManagement>
    <plugins>
      <plugin>
        <groupId>org.ekstazi</groupId>
        <artifactId>ekstazi-maven-plugin</artifactId>
        <version>5.3.0</version>
      </plugin>
    </plugins>
  </build>
  <profiles>
    <profile>
      <build>
        <plugins>
          <plugin>
            <artifactId>maven-surefire-plugin</artifactId>
            <configuration>
              <excludes><exclude>**/CiOnly.java</exclude></excludes>
            </configuration>
          </plugin>
        </plugins>
      </build>
      <id>ci</id>
    </profile>
  </profiles>
</project>
"#;

    const CHILD_POM: &str = r#"<project>
  <parent><artifactId>root</artifactId></parent>
  <build>
    <plugins>
      <plugin>
        <groupId>org.apache.maven.plugins</groupId>
        <artifactId>maven-surefire-plugin</artifactId>
      </plugin>
    </plugins>
  </build>
</project>
"#;

    #[test]
    fn test_parse_sections() {
        let plugins = parse_pom(Path::new("pom.xml"), ROOT_POM).unwrap();
        assert_eq!(plugins.managed.len(), 1);
        let managed = &plugins.managed[0];
        assert_eq!(managed.plugin, PluginKey::surefire());
        assert_eq!(managed.version.as_deref(), Some("3.0.0"));
        assert_eq!(managed.excludes, vec!["**/Slow*.java"]);

        assert_eq!(plugins.declared.len(), 2);
        assert_eq!(plugins.declared[0].plugin.artifact_id, "ekstazi-maven-plugin");
        assert!(!plugins.declared[0].is_conditional());
        assert_eq!(plugins.declared[1].profile.as_deref(), Some("ci"));
        assert_eq!(plugins.declared[1].excludes, vec!["**/CiOnly.java"]);
    }

    #[test]
    fn test_load_hierarchy_parents_by_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("pom.xml"), ROOT_POM).unwrap();
        std::fs::create_dir_all(root.join("modules/core")).unwrap();
        std::fs::write(root.join("modules/core/pom.xml"), CHILD_POM).unwrap();
        std::fs::create_dir_all(root.join("modules/core/target/classes")).unwrap();
        std::fs::write(root.join("modules/core/target/classes/pom.xml"), CHILD_POM).unwrap();

        let hierarchy = load_hierarchy(root).unwrap();
        assert_eq!(hierarchy.len(), 2);
        let core = hierarchy.unit(&UnitPath::new("modules/core")).unwrap();
        assert_eq!(core.parent, Some(UnitPath::root()));
        assert!(core.declared_block(&PluginKey::surefire()).is_some());
        assert_eq!(
            hierarchy.effective_excludes(&UnitPath::new("modules/core"), &PluginKey::surefire()),
            Some(vec!["**/Slow*.java".to_string()])
        );
    }

    #[test]
    fn test_malformed_pom_is_reported() {
        let err = parse_pom(Path::new("broken/pom.xml"), "<project><build></project>");
        assert!(matches!(err, Err(ExclusionError::Pom { .. })));
    }
}
