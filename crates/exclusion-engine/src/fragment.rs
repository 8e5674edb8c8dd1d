//! Rendering of plugin configuration fragments.

use quick_xml::escape::escape;

use crate::plugins::PluginKey;

/// Render a `<plugin>` block carrying an exclusion list.
///
/// `version` is omitted when `None`, which is how a unit picks up the
/// version from inherited management defaults.
pub fn render_plugin_fragment(
    plugin: &PluginKey,
    version: Option<&str>,
    excludes: &[String],
) -> String {
    let mut out = String::new();
    out.push_str("<plugin>\n");
    out.push_str(&format!("  <groupId>{}</groupId>\n", escape(&plugin.group_id)));
    out.push_str(&format!(
        "  <artifactId>{}</artifactId>\n",
        escape(&plugin.artifact_id)
    ));
    if let Some(version) = version {
        out.push_str(&format!("  <version>{}</version>\n", escape(version)));
    }
    out.push_str("  <configuration>\n");
    out.push_str("    <excludes>\n");
    for pattern in excludes {
        out.push_str(&format!("      <exclude>{}</exclude>\n", escape(pattern)));
    }
    out.push_str("    </excludes>\n");
    out.push_str("  </configuration>\n");
    out.push_str("</plugin>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_version() {
        let text = render_plugin_fragment(
            &PluginKey::surefire(),
            Some("2.22.2"),
            &["**/FooTest.java".to_string(), "**/BarTest.java".to_string()],
        );
        assert!(text.starts_with("<plugin>\n  <groupId>org.apache.maven.plugins</groupId>"));
        assert!(text.contains("<version>2.22.2</version>"));
        let foo = text.find("**/FooTest.java").unwrap();
        let bar = text.find("**/BarTest.java").unwrap();
        assert!(foo < bar);
    }

    #[test]
    fn test_render_without_version_escapes() {
        let plugin = PluginKey::new("org.ekstazi", "ekstazi-maven-plugin");
        let text = render_plugin_fragment(&plugin, None, &["**/A&B.java".to_string()]);
        assert!(!text.contains("<version>"));
        assert!(text.contains("<exclude>**/A&amp;B.java</exclude>"));
    }
}
