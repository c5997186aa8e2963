use pipecall_codec::{BinaryCodec, ObjectCodec};
use pipecall_rpc::{Server, ServerBuilder};

use crate::cmd::{CodecArg, Context, ServeArgs};
use crate::exit::{rpc_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{now_unix_seconds, print_server, ServerRecord};

pub fn run(args: ServeArgs, ctx: &Context) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))?;

    runtime.block_on(serve(args, ctx))
}

async fn serve(args: ServeArgs, ctx: &Context) -> CliResult<i32> {
    let builder = ServerBuilder::new(args.pipe.as_str())
        .with_instances(usize::from(args.instances))
        .with_failure_policy(args.on_handler_error.policy())
        .with_dispatch(ctx.dispatch.clone());

    let server = match args.codec {
        CodecArg::Json => start(builder.with_codec(args.encoding.json_codec()), args.fail_on_empty),
        CodecArg::Binary => start(builder.with_codec(BinaryCodec), args.fail_on_empty),
    }
    .map_err(|err| rpc_error("server start failed", err))?;

    print_server(
        &ServerRecord {
            pipe: &args.pipe,
            path: server.address().path().display().to_string(),
            codec: args.codec.as_str(),
            instances: server.instance_count(),
            on_handler_error: args.on_handler_error.as_str(),
            timestamp: now_unix_seconds(),
        },
        ctx.format,
    );

    install_ctrlc_handler(&server)?;

    server
        .when_all()
        .await
        .map_err(|err| rpc_error("server stopped", err))?;

    Ok(SUCCESS)
}

fn start<C: ObjectCodec>(builder: ServerBuilder<C>, fail_on_empty: bool) -> pipecall_rpc::Result<Server> {
    builder.start_fallible(move |request: String| echo_length(&request, fail_on_empty))
}

/// The sample handler: reply with the length of the request string.
pub fn echo_length(request: &str, fail_on_empty: bool) -> Result<u32, String> {
    if fail_on_empty && request.is_empty() {
        return Err("empty request rejected".to_string());
    }
    u32::try_from(request.chars().count())
        .map_err(|_| format!("request too long ({} chars)", request.chars().count()))
}

fn install_ctrlc_handler(server: &Server) -> CliResult<()> {
    let handle = server.cancel_handle();
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, cancelling listener instances");
        handle.cancel();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
