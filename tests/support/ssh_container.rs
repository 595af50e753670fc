// ABOUTME: OpenSSH server container for end-to-end resolution tests, driven through bollard.
// ABOUTME: Accepts the fixture key and a password, and serves a unix-socket echo at ECHO_SOCKET.

use bollard::Docker;
use bollard::exec::StartExecOptions;
use bollard::models::{ContainerCreateBody, ExecConfig, HostConfig, PortBinding};
use bollard::query_parameters::{CreateContainerOptions, CreateImageOptions, RemoveContainerOptions};
use futures::StreamExt;
use sshdial::ConnectionDescriptor;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const IMAGE: &str = "lscr.io/linuxserver/openssh-server:latest";
const SSH_PORT: u16 = 2222;
pub const TEST_USER: &str = "testuser";
pub const TEST_PASSWORD: &str = "secret";
/// Remote unix socket that echoes every byte back.
pub const ECHO_SOCKET: &str = "/tmp/sshdial-echo.sock";

/// Id of the running container, removed when the test binary exits.
static CONTAINER_ID: OnceLock<String> = OnceLock::new();

#[ctor::dtor]
fn remove_container_on_exit() {
    let Some(id) = CONTAINER_ID.get() else {
        return;
    };
    let Ok(rt) = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    else {
        return;
    };
    rt.block_on(async {
        if let Ok(docker) = Docker::connect_with_local_defaults() {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            let _ = docker.remove_container(id, Some(options)).await;
        }
    });
}

static SHARED_CONTAINER: tokio::sync::OnceCell<SshContainer> = tokio::sync::OnceCell::const_new();

/// The SSH container shared by every test in the binary, started on first use.
pub async fn shared_container() -> &'static SshContainer {
    SHARED_CONTAINER
        .get_or_init(|| async {
            SshContainer::start()
                .await
                .expect("failed to start SSH container")
        })
        .await
}

pub struct SshContainer {
    port: u16,
}

impl SshContainer {
    async fn start() -> Result<Self, BoxError> {
        let docker = Docker::connect_with_local_defaults()?;
        let public_key = std::fs::read_to_string(format!("{}.pub", Self::test_key_path()))?;

        let mut pull = docker.create_image(
            Some(CreateImageOptions {
                from_image: Some(IMAGE.to_string()),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = pull.next().await {
            progress?;
        }

        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
            listener.local_addr()?.port()
        };

        let env = vec![
            "PUID=1000".to_string(),
            "PGID=1000".to_string(),
            format!("USER_NAME={}", TEST_USER),
            format!("PUBLIC_KEY={}", public_key.trim()),
            "PASSWORD_ACCESS=true".to_string(),
            format!("USER_PASSWORD={}", TEST_PASSWORD),
            // Forwarding is off in the stock image; socat serves the echo socket.
            "DOCKER_MODS=linuxserver/mods:openssh-server-ssh-tunnel|linuxserver/mods:universal-package-install"
                .to_string(),
            "INSTALL_PACKAGES=socat".to_string(),
        ];
        let port_bindings = HashMap::from([(
            format!("{}/tcp", SSH_PORT),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(port.to_string()),
            }]),
        )]);
        let body = ContainerCreateBody {
            image: Some(IMAGE.to_string()),
            env: Some(env),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(format!("sshdial-ssh-test-{}", std::process::id())),
                    ..Default::default()
                }),
                body,
            )
            .await?;
        let id = container.id;
        let _ = CONTAINER_ID.set(id.clone());

        docker
            .start_container(&id, None::<bollard::query_parameters::StartContainerOptions>)
            .await?;

        wait_for_banner(port).await?;
        start_echo_socket(&docker, &id).await?;

        Ok(Self { port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Descriptor for this container authenticating with the fixture key.
    /// Host keys are not verified; callers override that where needed.
    pub fn key_descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::new("127.0.0.1")
            .port(self.port.to_string())
            .user(TEST_USER)
            .param("sshauth", "privkey")
            .param("keyfile", Self::test_key_path())
            .param("known_hosts_verify", "ignore")
    }

    /// Descriptor for this container authenticating with `password`.
    pub fn password_descriptor(&self, password: &str) -> ConnectionDescriptor {
        ConnectionDescriptor::new("127.0.0.1")
            .port(self.port.to_string())
            .user(TEST_USER)
            .password(password)
            .param("sshauth", "ssh-password")
            .param("known_hosts_verify", "ignore")
    }

    /// Descriptor for this container authenticating through an SSH agent.
    pub fn agent_descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::new("127.0.0.1")
            .port(self.port.to_string())
            .user(TEST_USER)
            .param("sshauth", "agent")
            .param("known_hosts_verify", "ignore")
    }

    pub fn test_key_path() -> String {
        format!("{}/tests/fixtures/test_key", env!("CARGO_MANIFEST_DIR"))
    }
}

/// Wait until sshd answers with its version banner.
async fn wait_for_banner(port: u16) -> Result<(), BoxError> {
    use tokio::io::AsyncReadExt;

    for _ in 0..120 {
        if let Ok(mut stream) = tokio::net::TcpStream::connect(("127.0.0.1", port)).await {
            let mut banner = [0u8; 8];
            let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut banner)).await;
            if matches!(read, Ok(Ok(n)) if banner[..n].starts_with(b"SSH-")) {
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Err("sshd did not answer in time".into())
}

/// Run a command in the container as the test user, detached. Returns the exec id.
async fn exec_detached(docker: &Docker, id: &str, cmd: &[&str]) -> Result<String, BoxError> {
    let exec = docker
        .create_exec(
            id,
            ExecConfig {
                cmd: Some(cmd.iter().map(|s| s.to_string()).collect()),
                user: Some(TEST_USER.to_string()),
                ..Default::default()
            },
        )
        .await?;
    docker
        .start_exec(
            &exec.id,
            Some(StartExecOptions {
                detach: true,
                ..Default::default()
            }),
        )
        .await?;
    Ok(exec.id)
}

/// Start the echo listener and wait until its socket exists.
async fn start_echo_socket(docker: &Docker, id: &str) -> Result<(), BoxError> {
    let listen = format!("UNIX-LISTEN:{},fork,unlink-early", ECHO_SOCKET);
    exec_detached(docker, id, &["socat", &listen, "EXEC:cat"]).await?;

    for _ in 0..40 {
        let check = exec_detached(docker, id, &["test", "-S", ECHO_SOCKET]).await?;
        loop {
            let info = docker.inspect_exec(&check).await?;
            if !info.running.unwrap_or(false) {
                if info.exit_code == Some(0) {
                    return Ok(());
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    Err(format!("{} never appeared in the container", ECHO_SOCKET).into())
}
