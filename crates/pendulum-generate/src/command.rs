//! Generator command line.

use pendulum_model::MethodSignature;

use crate::config::{GeneratorConfig, ToolPaths};
use crate::error::GenerationError;

/// Build the generator command line for `count` wrappers numbered from
/// `first_id`, all targeting `target`.
///
/// The result depends only on its inputs, so the same batch always yields
/// the same command.
pub fn build_command(
    config: &GeneratorConfig,
    paths: &ToolPaths,
    target: &MethodSignature,
    first_id: u64,
    count: u64,
) -> Result<Vec<String>, GenerationError> {
    let class = target.dotted_class_name();
    let search_path = paths.generator_search_path()?;
    let budget = config.time_budget_secs.to_string();

    let mut argv = vec![
        config.java.display().to_string(),
        format!("-Xmx{}", config.heap),
        "-jar".to_string(),
        paths.generator_jar.display().to_string(),
        "-class".to_string(),
        class.clone(),
        "-mem".to_string(),
        config.memory_mb.to_string(),
        format!("-DCP={}", search_path.to_string_lossy()),
        "-Dassertions=false".to_string(),
        format!("-Dglobal_timeout={budget}"),
        format!("-Dsearch_budget={budget}"),
        format!("-Dreport_dir={}", paths.scratch_dir.display()),
        format!("-Dtest_dir={}", paths.out_dir.display()),
        "-Dvirtual_fs=false".to_string(),
        "-Dcriterion=PATHCONDITION".to_string(),
        "-Dinline=false".to_string(),
    ];

    if config.multi_target {
        argv.extend(
            [
                "-Demit_tests_incrementally=true",
                "-Dalgorithm=DYNAMOSA",
                "-generateMOSuite",
            ]
            .map(String::from),
        );
    } else {
        argv.push(format!("-Djunit_suffix=_{first_id}_Test"));
        argv.extend(
            ["-Dhtml=false", "-Dmax_size=1", "-Dmax_initial_tests=1"].map(String::from),
        );
    }

    let goals: Vec<String> = (first_id..first_id + count)
        .map(|id| {
            format!(
                "{class},{}{},{}_{id}",
                target.name, target.descriptor, config.wrapper_prefix
            )
        })
        .collect();
    argv.push(format!("-Dpath_condition={}", goals.join(":")));
    argv.extend(config.extra_args.iter().cloned());
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> ToolPaths {
        ToolPaths {
            classes: vec!["/w/classes".into()],
            helper_lib: "/w/helper.jar".into(),
            generator_jar: "/w/gen.jar".into(),
            scratch_dir: "/w/tmp".into(),
            scratch_bin_dir: "/w/tmp/bin".into(),
            out_dir: "/w/out".into(),
        }
    }

    #[test]
    fn test_single_target_command() {
        let target = MethodSignature::new("pkg/Foo", "(I)I", "bar");
        let argv = build_command(&GeneratorConfig::default(), &paths(), &target, 7, 1).unwrap();
        assert_eq!(argv[0], "java");
        assert!(argv.contains(&"-class".to_string()));
        assert!(argv.contains(&"pkg.Foo".to_string()));
        assert!(argv.contains(&"-DCP=/w/classes:/w/helper.jar:/w/tmp".to_string()));
        assert!(argv.contains(&"-Djunit_suffix=_7_Test".to_string()));
        assert!(argv.contains(&"-Dtest_dir=/w/out".to_string()));
        assert!(!argv.contains(&"-generateMOSuite".to_string()));
        assert_eq!(
            argv.last().map(String::as_str),
            Some("-Dpath_condition=pkg.Foo,bar(I)I,EvoSuiteWrapper_7")
        );
    }

    #[test]
    fn test_multi_target_lists_every_wrapper() {
        let target = MethodSignature::new("pkg/Foo", "()V", "run");
        let cfg = GeneratorConfig {
            multi_target: true,
            max_targets: 3,
            ..GeneratorConfig::default()
        };
        let argv = build_command(&cfg, &paths(), &target, 4, 3).unwrap();
        assert!(argv.contains(&"-generateMOSuite".to_string()));
        assert!(!argv.iter().any(|a| a.starts_with("-Djunit_suffix")));
        assert!(argv.contains(
            &"-Dpath_condition=pkg.Foo,run()V,EvoSuiteWrapper_4:pkg.Foo,run()V,EvoSuiteWrapper_5:pkg.Foo,run()V,EvoSuiteWrapper_6"
                .to_string()
        ));
    }

    #[test]
    fn test_command_is_deterministic() {
        let target = MethodSignature::new("pkg/Foo", "()V", "run");
        let cfg = GeneratorConfig::default();
        assert_eq!(
            build_command(&cfg, &paths(), &target, 1, 1).unwrap(),
            build_command(&cfg, &paths(), &target, 1, 1).unwrap()
        );
    }
}
