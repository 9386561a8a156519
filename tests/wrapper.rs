#![cfg(unix)]

use cmdflow::constants::EXIT_CODE_KEY;
use cmdflow::core::compiler;
use cmdflow::core::wrapper::{WrapperConfig, WrapperError, run_wrapper};
use cmdflow::system::executor::{self, ExecOptions, StdioPolicy};
use cmdflow::{ActionError, CancellationToken, Context};
use parking_lot::Mutex;
use std::sync::Arc;

#[tokio::test]
async fn test_after_exec_sees_the_real_exit_code() {
    let seen = Arc::new(Mutex::new(None));
    let recorder = Arc::clone(&seen);
    let config = WrapperConfig::program("sh")
        .inject(["-c", "exit 3"])
        .stdio(StdioPolicy::Capture)
        .after_exec(move |_ctx, result| {
            *recorder.lock() = Some(result.exit_code);
            Ok(())
        });

    let ctx = Context::builder("sh").build();
    run_wrapper(&config, ctx.clone()).await.unwrap();

    assert_eq!(*seen.lock(), Some(3));
    assert_eq!(ctx.get::<i64>(EXIT_CODE_KEY), Some(3));
}

#[tokio::test]
async fn test_non_zero_exit_without_hook_is_an_error() {
    let config = WrapperConfig::program("sh")
        .inject(["-c", "exit 4"])
        .stdio(StdioPolicy::Capture);

    let err = run_wrapper(&config, Context::builder("sh").build()).await.unwrap_err();
    assert!(
        matches!(err, ActionError::Wrapper(WrapperError::NonZeroExit { code: 4, .. })),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_compiled_command_matches_direct_invocation() {
    let captured = Arc::new(Mutex::new(None));
    let recorder = Arc::clone(&captured);
    let config = WrapperConfig::program("echo")
        .inject(["[prefix]"])
        .leading_flags(["-n"])
        .map_bool("no-newline", "-n")
        .stdio(StdioPolicy::Capture)
        .after_exec(move |_ctx, result| {
            *recorder.lock() = result.stdout.clone();
            Ok(())
        });
    let ctx = Context::builder("echo")
        .flag("no-newline", true)
        .args(["hello", "world"])
        .build();

    let compiled = compiler::compile(&config, &ctx).unwrap();
    assert_eq!(compiled.argv, ["-n", "[prefix]", "hello", "world"]);

    run_wrapper(&config, ctx).await.unwrap();

    let options = ExecOptions {
        stdio: StdioPolicy::Capture,
        ..Default::default()
    };
    let direct = executor::execute(&compiled.program, &compiled.argv, &options, &CancellationToken::new()).await;
    assert_eq!(direct.stdout.as_deref(), Some("[prefix] hello world"));
    assert_eq!(*captured.lock(), direct.stdout);
}

#[tokio::test]
async fn test_before_exec_can_rewrite_forwarded_args() {
    let output = Arc::new(Mutex::new(None));
    let recorder = Arc::clone(&output);
    let config = WrapperConfig::program("echo")
        .stdio(StdioPolicy::Capture)
        .before_exec(|_ctx, mut args| {
            args.reverse();
            Ok(args)
        })
        .after_exec(move |_ctx, result| {
            *recorder.lock() = result.stdout.clone();
            Ok(())
        });

    let ctx = Context::builder("echo").args(["one", "two"]).build();
    run_wrapper(&config, ctx).await.unwrap();

    assert_eq!(output.lock().as_deref(), Some("two one\n"));
}

#[tokio::test]
async fn test_missing_program_surfaces_spawn_failure() {
    let config = WrapperConfig::program("cmdflow-no-such-program").stdio(StdioPolicy::Capture);
    let err = run_wrapper(&config, Context::builder("missing").build()).await.unwrap_err();
    assert!(matches!(err, ActionError::Wrapper(WrapperError::Exec(_))), "{:?}", err);
}
