//! Shell completion support for --set overrides
//!
//! The list of valid override keys is derived from the JSON Schema of
//! [`ProfileConfig`], so it never drifts from the profile format.

use schemars::schema::{Schema, SchemaObject};
use schemars::schema_for;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::ProfileConfig;

/// Bash completion script that also completes `--set` keys
pub fn generate_bash_completion(bin_name: &str) -> String {
    format!(
        r#"# Bash completion for {bin_name}
#   source <({bin_name} completions bash)

_{bin_name}() {{
    local cur prev words cword
    _init_completion || return

    if [[ "$prev" == "--set" && "$cur" != *"="* ]]; then
        COMPREPLY=( $(compgen -S "=" -W "$({bin_name} complete-paths 2>/dev/null)" -- "$cur") )
        compopt -o nospace
        return 0
    fi

    case "$prev" in
        -P|--profile)
            _filedir toml
            return 0
            ;;
        -l|--log-level)
            COMPREPLY=( $(compgen -W "trace debug info warn error" -- "$cur") )
            return 0
            ;;
    esac

    if [[ "$cur" == -* ]]; then
        COMPREPLY=( $(compgen -W "-P --profile --set -l --log-level -h --help -V --version" -- "$cur") )
    elif [[ $cword -eq 1 ]]; then
        COMPREPLY=( $(compgen -W "run completions schema help" -- "$cur") )
    elif [[ "${{words[1]}}" == "completions" ]]; then
        COMPREPLY=( $(compgen -W "bash zsh fish elvish powershell" -- "$cur") )
    fi
}}

complete -F _{bin_name} {bin_name}
"#
    )
}

/// Every dotted path accepted by `--set`
pub fn get_config_paths() -> Vec<String> {
    let root = schema_for!(ProfileConfig);
    let mut paths = BTreeSet::new();
    collect_paths(&root.schema, "", &mut paths, &root.definitions);
    paths.into_iter().collect()
}

fn collect_paths(
    schema: &SchemaObject,
    prefix: &str,
    paths: &mut BTreeSet<String>,
    definitions: &BTreeMap<String, Schema>,
) {
    let Some(object) = &schema.object else {
        return;
    };
    for (name, property) in &object.properties {
        let path = if prefix.is_empty() { name.clone() } else { format!("{prefix}.{name}") };
        paths.insert(path.clone());
        if let Some(resolved) = resolve(property, definitions) {
            collect_paths(resolved, &path, paths, definitions);
        }
    }
}

/// Follow `$ref` and single-element `allOf` wrappers to the object schema
fn resolve<'a>(schema: &'a Schema, definitions: &'a BTreeMap<String, Schema>) -> Option<&'a SchemaObject> {
    let Schema::Object(object) = schema else {
        return None;
    };
    if let Some(name) = object.reference.as_deref().and_then(|r| r.strip_prefix("#/definitions/")) {
        return definitions.get(name).and_then(|def| resolve(def, definitions));
    }
    if let Some(all_of) = object.subschemas.as_ref().and_then(|s| s.all_of.as_ref()) {
        if let [inner] = all_of.as_slice() {
            return resolve(inner, definitions);
        }
    }
    Some(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_config_paths() {
        let paths = get_config_paths();

        for expected in [
            "experiment",
            "experiment.name",
            "experiment.duration",
            "experiment.mode",
            "experiment.seed",
            "target.url",
            "target.verb",
            "pacing.connections",
            "pacing.rate",
            "pacing.followup_interval",
            "pacing.liveness_grace",
            "payload.max_fragment_len",
            "payload.content_length",
            "transport.multiplexer",
            "output.csv",
            "output.html",
        ] {
            assert!(paths.contains(&expected.to_string()), "missing {expected} in {paths:?}");
        }
    }

    #[test]
    fn test_bash_script_mentions_binary() {
        let script = generate_bash_completion("sloth");
        assert!(script.contains("complete -F _sloth sloth"));
        assert!(script.contains("sloth complete-paths"));
    }
}
