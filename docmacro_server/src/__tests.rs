use std::net::Ipv4Addr;
use std::time::Duration;

use docmacro_core::DocmacroConfig;
use docmacro_core::ServerMetadata;
use rstest::rstest;
use similar_asserts::assert_eq;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing_test::traced_test;

use super::*;

const WAIT: Duration = Duration::from_secs(5);

async fn start(options: ServerOptions) -> (u16, JoinHandle<ServerResult<()>>) {
	let server = Server::bind(options)
		.await
		.unwrap_or_else(|e| panic!("bind: {e}"));
	let port = server.port().unwrap_or_else(|e| panic!("port: {e}"));

	(port, tokio::spawn(server.run()))
}

fn client(root: &std::path::Path) -> Client {
	Client::new(root, &DocmacroConfig::default()).with_timeout(WAIT)
}

async fn request(client: &Client, port: u16, message: Message) -> Message {
	client
		.send(port, &message)
		.await
		.unwrap_or_else(|e| panic!("send: {e}"))
}

async fn raw_request(port: u16, payload: &[u8]) -> Message {
	let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))
		.await
		.unwrap_or_else(|e| panic!("connect: {e}"));
	stream
		.write_all(payload)
		.await
		.unwrap_or_else(|e| panic!("write: {e}"));
	stream
		.shutdown()
		.await
		.unwrap_or_else(|e| panic!("shutdown: {e}"));

	let mut response = Vec::new();
	stream
		.read_to_end(&mut response)
		.await
		.unwrap_or_else(|e| panic!("read: {e}"));

	serde_json::from_slice(&response).unwrap_or_else(|e| panic!("response: {e}"))
}

async fn finished(handle: JoinHandle<ServerResult<()>>) {
	tokio::time::timeout(WAIT, handle)
		.await
		.unwrap_or_else(|_| panic!("server did not stop"))
		.unwrap_or_else(|e| panic!("server task: {e}"))
		.unwrap_or_else(|e| panic!("server: {e}"));
}

#[tokio::test]
async fn ping_shutdown_and_metadata() {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	let client = client(tmp.path());
	let options = ServerOptions::new("latex").with_metadata_path(client.metadata_path());
	let (port, handle) = start(options).await;

	assert!(client.ping(port).await);
	assert_eq!(
		client
			.active_server()
			.await
			.unwrap_or_else(|e| panic!("active: {e}")),
		Some(ServerMetadata::new(port, "latex"))
	);

	let response = client
		.stop_server(port)
		.await
		.unwrap_or_else(|e| panic!("stop: {e}"));
	assert_eq!(
		response,
		Message::new(MessageType::Shutdown, "Shutting down server.")
	);

	finished(handle).await;
	assert!(!client.metadata_path().exists(), "metadata should be removed");
	assert!(!client.ping(port).await);
}

#[tokio::test]
async fn namespace_persists_between_requests() {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	let client = client(tmp.path());
	let (port, handle) = start(ServerOptions::new("html")).await;

	let first = request(&client, port, Message::string("x = 40 + 2")).await;
	assert_eq!(first, Message::new(MessageType::String, ""));

	let second = request(&client, port, Message::string("print(x)")).await;
	assert_eq!(second, Message::new(MessageType::String, "42"));

	request(&client, port, Message::shutdown()).await;
	finished(handle).await;
}

#[rstest]
#[case::tabs_and_lines("print('a', 1, true)\nprint('b')", "a\t1\ttrue\nb")]
#[case::fixed_width("print(doc.format(3.14159, '>8.2f'))", "    3.14")]
#[case::thousands("print(doc.format(1234567, ','))", "1,234,567")]
#[case::string_value("print(doc.format('ab', '*^6'))", "**ab**")]
#[case::target_format("print(doc.target_format)", "html")]
#[case::fragment_text("print(doc.fragment('a %x b'))", "a `` print(x) ``{.py} b")]
#[case::nothing_printed("local y = 1", "")]
#[tokio::test]
async fn string_requests(#[case] code: &str, #[case] expected: &str) {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	let client = client(tmp.path());
	let (port, handle) = start(ServerOptions::new("html")).await;

	let response = request(&client, port, Message::string(code)).await;
	assert_eq!(response, Message::new(MessageType::String, expected));

	request(&client, port, Message::shutdown()).await;
	finished(handle).await;
}

#[rstest]
#[case::fragment("doc.fragment('Hello *world*')", "Hello *world*")]
#[case::wrapped_fragment("{ doc.fragment('x') }", "x")]
#[tokio::test]
async fn object_requests(#[case] code: &str, #[case] text: &str) {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	let client = client(tmp.path());
	let (port, handle) = start(ServerOptions::new("html")).await;

	let response = request(&client, port, Message::object(code)).await;
	assert_eq!(
		response,
		Message::new(
			MessageType::Object,
			serde_json::json!({ "t": "RawBlock", "c": ["markdown", text] })
		)
	);

	request(&client, port, Message::shutdown()).await;
	finished(handle).await;
}

#[rstest]
#[case::integer(Message::object("42"), "unsupported object type: integer")]
#[case::plain_table(Message::object("{1, 2}"), "unsupported object type: table")]
#[case::payload_not_string(
	Message::new(MessageType::String, 5),
	"`string` requests need a string payload"
)]
#[case::error_request(Message::error("hm"), "unexpected request type: error")]
#[tokio::test]
async fn rejected_requests(#[case] message: Message, #[case] expected: &str) {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	let client = client(tmp.path());
	let (port, handle) = start(ServerOptions::new("html")).await;

	let response = request(&client, port, message).await;
	assert_eq!(response, Message::error(expected));

	request(&client, port, Message::shutdown()).await;
	finished(handle).await;
}

#[tokio::test]
async fn execution_errors_keep_the_server_alive() {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	let client = client(tmp.path());
	let (port, handle) = start(ServerOptions::new("html")).await;

	request(&client, port, Message::string("kept = 'yes'")).await;

	let response = request(&client, port, Message::string("print('lost') error('boom')")).await;
	assert!(response.is_error());
	assert!(
		response.text().is_some_and(|text| text.contains("boom")),
		"unexpected error: {response:?}"
	);

	let after = request(&client, port, Message::string("print(kept)")).await;
	assert_eq!(after, Message::new(MessageType::String, "yes"));

	request(&client, port, Message::shutdown()).await;
	finished(handle).await;
}

#[rstest]
#[case::not_json(b"not json\n".as_slice(), "invalid request")]
#[case::unknown_type(br#"{"message": "x", "type": "bogus"}"#.as_slice(), "unknown variant")]
#[case::missing_type(br#"{"message": "x"}"#.as_slice(), "missing field `type`")]
#[tokio::test]
async fn malformed_requests(#[case] payload: &[u8], #[case] fragment: &str) {
	let (port, handle) = start(ServerOptions::new("html")).await;

	let response = raw_request(port, payload).await;
	assert!(response.is_error());
	assert!(
		response.text().is_some_and(|text| text.contains(fragment)),
		"unexpected error: {response:?}"
	);

	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	request(&client(tmp.path()), port, Message::shutdown()).await;
	finished(handle).await;
}

#[tokio::test]
async fn file_requests_run_scripts() {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	let script = tmp.path().join("script.lua");
	std::fs::write(&script, "local n = 3\nprint('from file', n * 2)\n")
		.unwrap_or_else(|e| panic!("write: {e}"));
	let client = client(tmp.path());
	let (port, handle) = start(ServerOptions::new("html")).await;

	let response = request(&client, port, Message::file(script.display().to_string())).await;
	assert_eq!(response, Message::new(MessageType::File, "from file\t6"));

	let missing = request(&client, port, Message::file("missing.lua")).await;
	assert!(missing.is_error());

	request(&client, port, Message::shutdown()).await;
	finished(handle).await;
}

#[tokio::test]
async fn oversized_messages_are_rejected() {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	let client = client(tmp.path());
	let mut options = ServerOptions::new("html");
	options.max_message_bytes = 16;
	let (port, handle) = start(options).await;

	let response = request(&client, port, Message::string("x".repeat(64))).await;
	assert_eq!(response, Message::error("message exceeds the limit of 16 bytes"));

	request(&client, port, Message::shutdown()).await;
	finished(handle).await;
}

#[tokio::test]
async fn shutdown_stops_the_server_within_one_poll() {
	let poll = Duration::from_millis(200);
	let options = ServerOptions::new("html").with_idle_timeout(Duration::from_secs(2), poll);
	let (port, handle) = start(options).await;
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));

	let response = request(&client(tmp.path()), port, Message::shutdown()).await;
	assert_eq!(response.kind, MessageType::Shutdown);

	tokio::time::timeout(poll, handle)
		.await
		.unwrap_or_else(|_| panic!("server still running one poll after shutdown"))
		.unwrap_or_else(|e| panic!("server task: {e}"))
		.unwrap_or_else(|e| panic!("server: {e}"));
}

#[tokio::test]
async fn shutdown_sender_stops_the_server() {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	let client = client(tmp.path());
	let options = ServerOptions::new("html").with_metadata_path(client.metadata_path());
	let server = Server::bind(options)
		.await
		.unwrap_or_else(|e| panic!("bind: {e}"));
	let shutdown = server.shutdown_sender();
	let handle = tokio::spawn(server.run());

	assert!(client.metadata_path().exists());
	shutdown.send_replace(true);

	finished(handle).await;
	assert!(!client.metadata_path().exists(), "metadata should be removed");
}

#[tokio::test]
async fn hung_executions_are_aborted() {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	let client = client(tmp.path());
	let options = ServerOptions::new("html").with_execution_timeout(Duration::from_millis(300));
	let (port, handle) = start(options).await;

	let hung = request(&client, port, Message::string("while true do end")).await;
	assert!(hung.is_error(), "unexpected: {hung:?}");
	assert!(
		hung.text().is_some_and(|text| text.contains("time limit of 300 ms")),
		"unexpected error: {hung:?}"
	);

	let next = request(&client, port, Message::string("print(1)")).await;
	assert_eq!(next, Message::new(MessageType::String, "1"));

	request(&client, port, Message::shutdown()).await;
	finished(handle).await;
}

#[tokio::test]
async fn idle_server_shuts_down() {
	let options = ServerOptions::new("html")
		.with_idle_timeout(Duration::from_millis(200), Duration::from_millis(50));
	let (_, handle) = start(options).await;

	finished(handle).await;
}

#[tokio::test]
#[traced_test]
async fn server_logs_its_address() {
	let (port, handle) = start(ServerOptions::new("html")).await;
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	request(&client(tmp.path()), port, Message::shutdown()).await;
	finished(handle).await;

	assert!(logs_contain("server listening"));
	assert!(logs_contain(&format!("127.0.0.1:{port}")));
}

#[tokio::test]
async fn no_active_server_without_metadata() {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	let client = client(tmp.path());

	assert_eq!(
		client
			.active_server()
			.await
			.unwrap_or_else(|e| panic!("active: {e}")),
		None
	);
	assert!(!client.remove_metadata().unwrap_or_else(|e| panic!("remove: {e}")));
}

#[tokio::test]
async fn stale_metadata_is_not_active() {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	let client = client(tmp.path());
	let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
		.unwrap_or_else(|e| panic!("bind: {e}"));
	let port = listener
		.local_addr()
		.unwrap_or_else(|e| panic!("addr: {e}"))
		.port();
	drop(listener);

	ServerMetadata::new(port, "html")
		.write(client.metadata_path())
		.unwrap_or_else(|e| panic!("write: {e}"));

	assert!(!client.ping(port).await);
	assert_eq!(
		client
			.active_server()
			.await
			.unwrap_or_else(|e| panic!("active: {e}")),
		None
	);
	assert!(client.remove_metadata().unwrap_or_else(|e| panic!("remove: {e}")));
}

#[tokio::test]
async fn start_server_reports_missing_executable() {
	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	let client = client(tmp.path()).with_executable(tmp.path().join("no-such-binary"));

	let result = client.start_server("html").await;
	assert!(matches!(result, Err(ServerError::Io(_))), "unexpected: {result:?}");
}

#[test]
fn environment_discards_output_of_failed_chunks() -> ServerResult<()> {
	let environment = LuaEnvironment::new("latex")?;

	assert!(environment.execute("print('partial') error('x')", "test").is_err());
	assert_eq!(environment.execute("print('ok')", "test")?, "ok");
	assert_eq!(environment.target_format(), "latex");

	Ok(())
}

#[test]
fn environment_time_limit_stops_hung_chunks() -> ServerResult<()> {
	let environment = LuaEnvironment::new("html")?.with_time_limit(Duration::from_millis(100));
	assert_eq!(environment.time_limit(), Some(Duration::from_millis(100)));

	let error = environment
		.execute("print('before') while true do end", "test")
		.err()
		.map(|e| e.to_string())
		.unwrap_or_default();
	assert!(error.contains("time limit of 100 ms"), "unexpected error: {error}");

	let value = environment.evaluate("(function() while true do end end)()");
	assert!(value.is_err());

	assert_eq!(environment.execute("for i = 1, 100000 do end print('done')", "test")?, "done");

	Ok(())
}

#[test]
fn environment_reports_bad_format_specs() -> ServerResult<()> {
	let environment = LuaEnvironment::new("html")?;
	let error = environment
		.execute("print(doc.format('x', 'd'))", "test")
		.err()
		.map(|e| e.to_string())
		.unwrap_or_default();

	assert!(
		error.contains("unknown format code 'd' for value of type string"),
		"unexpected error: {error}"
	);

	Ok(())
}

#[rstest]
#[case::object(br#"{"type": "ping"}"#.as_slice(), 64, br#"{"type": "ping"}"#.as_slice())]
#[case::trailing_newline(b"{\"a\": 1}\n".as_slice(), 64, b"{\"a\": 1}".as_slice())]
#[case::stops_after_first_value(b"{\"a\": 1}{\"b\": 2}".as_slice(), 64, b"{\"a\": 1}".as_slice())]
#[case::multi_line_value(b"{\n  \"a\": [1, 2]\n}\n".as_slice(), 64, b"{\n  \"a\": [1, 2]\n}".as_slice())]
#[case::braces_inside_strings(br#"{"message": "t = {}}"}"#.as_slice(), 64, br#"{"message": "t = {}}"}"#.as_slice())]
#[case::not_json(b"not json\n".as_slice(), 64, b"not json".as_slice())]
#[case::truncated_at_end_of_stream(b"{\"a\":".as_slice(), 64, b"{\"a\":".as_slice())]
#[case::exactly_at_limit(b"{}\n".as_slice(), 2, b"{}".as_slice())]
#[case::empty(b"".as_slice(), 2, b"".as_slice())]
#[tokio::test]
async fn frames(#[case] input: &[u8], #[case] limit: usize, #[case] expected: &[u8]) {
	let frame = read_frame(input, limit)
		.await
		.unwrap_or_else(|e| panic!("frame: {e}"));
	assert_eq!(frame.as_slice(), expected);
}

#[tokio::test]
async fn frames_over_the_limit_are_rejected() {
	let result = read_frame(br#"{"message": "abcdef"}"#.as_slice(), 8).await;
	assert!(matches!(result, Err(ServerError::MessageTooLarge { limit: 8 })));
}

#[tokio::test]
async fn frames_end_without_newline_or_end_of_stream() {
	let (mut writer, reader) = tokio::io::duplex(1024);
	writer
		.write_all(br#"{"message": "ping", "type": "ping"}"#)
		.await
		.unwrap_or_else(|e| panic!("write: {e}"));

	let frame = tokio::time::timeout(WAIT, read_frame(reader, 1024))
		.await
		.unwrap_or_else(|_| panic!("frame never ended"))
		.unwrap_or_else(|e| panic!("frame: {e}"));
	assert_eq!(frame.as_slice(), br#"{"message": "ping", "type": "ping"}"#.as_slice());

	drop(writer);
}

#[tokio::test]
async fn requests_without_newline_are_answered() {
	let (port, handle) = start(ServerOptions::new("html")).await;

	let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))
		.await
		.unwrap_or_else(|e| panic!("connect: {e}"));
	stream
		.write_all(br#"{"message": "ping", "type": "ping"}"#)
		.await
		.unwrap_or_else(|e| panic!("write: {e}"));

	let mut response = Vec::new();
	tokio::time::timeout(WAIT, stream.read_to_end(&mut response))
		.await
		.unwrap_or_else(|_| panic!("no response without a newline"))
		.unwrap_or_else(|e| panic!("read: {e}"));
	let response: Message = serde_json::from_slice(&response).unwrap_or_else(|e| panic!("response: {e}"));
	assert_eq!(response, Message::new(MessageType::Ping, "pong"));

	let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
	request(&client(tmp.path()), port, Message::shutdown()).await;
	finished(handle).await;
}

#[test]
fn messages_serialize_as_json_objects() {
	let value = serde_json::to_value(Message::error("x")).unwrap_or_else(|e| panic!("json: {e}"));
	assert_eq!(value, serde_json::json!({ "message": "x", "type": "error" }));
}

#[rstest]
#[case::defaults(Duration::from_secs(60), Duration::from_secs(1), 60)]
#[case::rounded_up(Duration::from_millis(210), Duration::from_millis(50), 5)]
#[case::zero(Duration::ZERO, Duration::from_millis(50), 1)]
fn idle_polls(#[case] idle: Duration, #[case] poll: Duration, #[case] expected: u32) {
	let options = ServerOptions::new("html").with_idle_timeout(idle, poll);
	assert_eq!(options.idle_polls(), expected);
}
