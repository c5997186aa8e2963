use std::io::BufRead;
use std::time::Duration;

use pipecall_codec::{BinaryCodec, ObjectCodec};
use pipecall_rpc::Client;

use crate::cmd::{parse_duration, CodecArg, Context, RequestArgs};
use crate::exit::{io_error, rpc_error, CliResult, SUCCESS};
use crate::output::{print_response, ResponseRecord};

const EXIT_COMMAND: &str = "exit";

pub fn run(args: RequestArgs, ctx: &Context) -> CliResult<i32> {
    let timeout = args.timeout.as_deref().map(parse_duration).transpose()?;
    let client = Client::<String, u32>::new(args.pipe.as_str())
        .with_server_name(args.server.as_str())
        .with_dispatch(ctx.dispatch.clone());

    match args.codec {
        CodecArg::Json => session(
            &client.with_codec(args.encoding.json_codec()),
            &args,
            timeout,
            ctx,
        ),
        CodecArg::Binary => session(&client.with_codec(BinaryCodec), &args, timeout, ctx),
    }
}

fn session<C: ObjectCodec>(
    client: &Client<String, u32, C>,
    args: &RequestArgs,
    timeout: Option<Duration>,
    ctx: &Context,
) -> CliResult<i32> {
    if let Some(data) = &args.data {
        exchange(client, args, data, timeout, ctx)?;
        return Ok(SUCCESS);
    }

    eprintln!("Input \"{EXIT_COMMAND}\" to end the session");
    eprintln!("Input any other line to get its length from the pipe server");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(|err| io_error("failed reading stdin", err))?;
        if line == EXIT_COMMAND {
            break;
        }
        exchange(client, args, &line, timeout, ctx)?;
    }

    Ok(SUCCESS)
}

fn exchange<C: ObjectCodec>(
    client: &Client<String, u32, C>,
    args: &RequestArgs,
    text: &str,
    timeout: Option<Duration>,
    ctx: &Context,
) -> CliResult<()> {
    let request = text.to_string();
    let response = match timeout {
        Some(timeout) => client.request_timeout(&request, timeout),
        None => client.request(&request),
    }
    .map_err(|err| rpc_error("request failed", err))?;

    print_response(
        &ResponseRecord::new(&args.pipe, args.codec.as_str(), text, response),
        ctx.format,
    );
    Ok(())
}
