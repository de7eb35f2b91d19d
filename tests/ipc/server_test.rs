/*!
 * IPC Server Tests
 * Token handshake and command replies over a loopback socket
 */

use lifecycle_kernel::config::IpcConfig;
use lifecycle_kernel::core::limits::MAX_IPC_LINE;
use lifecycle_kernel::{IpcServer, LifecycleManager, ManagedProcess};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const TOKEN: &str = "test-secret";

type Manager = LifecycleManager<serde_json::Value>;

struct Harness {
    manager: Arc<Manager>,
    addr: SocketAddr,
    server: JoinHandle<()>,
}

async fn spawn_server() -> Harness {
    let manager = Arc::new(Manager::new());
    manager
        .register_process(ManagedProcess::custom("svc", || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }))
        .unwrap();

    let config = IpcConfig {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    let server = IpcServer::bind(&config, TOKEN, Arc::clone(&manager))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let server = tokio::spawn(server.serve());

    Harness {
        manager,
        addr,
        server,
    }
}

async fn connect(addr: SocketAddr, token: &str) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    writer
        .write_all(format!("{}\n", token).as_bytes())
        .await
        .unwrap();
    (BufReader::new(reader), writer)
}

async fn command(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    line: &str,
) -> String {
    writer
        .write_all(format!("{}\n", line).as_bytes())
        .await
        .unwrap();
    let mut reply = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut reply))
        .await
        .unwrap()
        .unwrap();
    reply
}

#[tokio::test]
#[serial]
async fn test_wrong_token_is_rejected() {
    let harness = spawn_server().await;
    let (mut reader, _writer) = connect(harness.addr, "wrong").await;

    let mut reply = String::new();
    reader.read_to_string(&mut reply).await.unwrap();
    assert_eq!(reply, "Erro: Acesso negado! Token inválido.\n");

    harness.manager.shutdown();
    harness.server.await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_non_utf8_token_is_denied() {
    let harness = spawn_server().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    stream.write_all(b"\xff\xfe\n").await.unwrap();

    let mut reply = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, "Erro: Acesso negado! Token inválido.\n");

    harness.manager.shutdown();
    harness.server.await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_long_line_gets_one_reply() {
    let harness = spawn_server().await;
    let (mut reader, mut writer) = connect(harness.addr, TOKEN).await;

    let long = "A".repeat(MAX_IPC_LINE + 904);
    assert_eq!(
        command(&mut reader, &mut writer, &long).await,
        "Comando desconhecido\n"
    );

    // The next reply answers the next command, not the tail of the long line
    let status = command(&mut reader, &mut writer, "STATUS").await;
    assert!(status.starts_with("Status:"), "got {:?}", status);

    harness.manager.shutdown();
    harness.server.await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_status_and_unknown_commands() {
    let harness = spawn_server().await;
    let (mut reader, mut writer) = connect(harness.addr, TOKEN).await;

    let status = command(&mut reader, &mut writer, "STATUS").await;
    assert_eq!(status, "Status: process 'svc' running: false\n");

    let unknown = command(&mut reader, &mut writer, "DANCE").await;
    assert_eq!(unknown, "Comando desconhecido\n");

    harness.manager.shutdown();
    harness.server.await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_start_stop_restart_drive_the_manager() {
    let harness = spawn_server().await;
    let (mut reader, mut writer) = connect(harness.addr, TOKEN).await;
    let process = harness.manager.process("svc").unwrap();

    assert_eq!(
        command(&mut reader, &mut writer, "START").await,
        "Processos iniciados\n"
    );
    assert!(process.is_running());

    assert_eq!(
        command(&mut reader, &mut writer, "STOP").await,
        "Processos parados\n"
    );
    assert!(!process.is_running());

    assert_eq!(
        command(&mut reader, &mut writer, "RESTART").await,
        "Processos reiniciados\n"
    );
    assert!(process.is_running());

    // Processes stay registered after STOP
    let status = command(&mut reader, &mut writer, "STATUS").await;
    assert!(status.starts_with("Status: process 'svc'"));

    harness.manager.stop_all().await.unwrap();
    harness.manager.shutdown();
    harness.server.await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_shutdown_ends_server_and_connections() {
    let harness = spawn_server().await;
    let (mut reader, mut writer) = connect(harness.addr, TOKEN).await;
    command(&mut reader, &mut writer, "STATUS").await;

    harness.manager.shutdown();
    tokio::time::timeout(Duration::from_secs(5), harness.server)
        .await
        .expect("serve should return after shutdown")
        .unwrap();

    let mut rest = String::new();
    let read = tokio::time::timeout(Duration::from_secs(5), reader.read_to_string(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read, 0);
}

#[tokio::test]
#[serial]
async fn test_bind_rejects_empty_token() {
    let manager = Arc::new(Manager::new());
    let config = IpcConfig {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    assert!(IpcServer::bind(&config, "", manager).await.is_err());
}
