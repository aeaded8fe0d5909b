// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Client role. Connects to a server, performs the `hello` handshake, and
//! replays whatever it receives onto the local display through a
//! [`DisplayBackend`]. Not part of the core transition/forwarding engine —
//! every message this role acts on already carries the server's decisions.

use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use crate::backend::DisplayBackend;
use crate::backend::InputEventKind;
use crate::backend::Modifiers;
use crate::backend::RawInputEvent;
use crate::config::ClientConfig;
use crate::geometry::NormalizedPoint;
use crate::geometry::ScreenGeometry;
use crate::network::framing::Framed;
use crate::network::protocol::KeyEventKind;
use crate::network::protocol::Message;
use crate::network::protocol::MouseEventKind;
use crate::network::protocol::ScreenInfo;
use crate::prelude::*;

/// Runs the client role until told to stop reconnecting. Blocks the calling
/// thread; callers that want a non-blocking client spawn this on its own
/// thread.
pub fn run(config: &ClientConfig, name: &str, server_address: &str, mut backend: Box<dyn DisplayBackend>) -> Result<()> {
    let mut attempt: u32 = 0;
    loop {
        match connect_and_serve(server_address, name, backend.as_mut()) {
            Ok(()) => info!("connection to {server_address} closed"),
            Err(e) => warn!("connection to {server_address} ended: {e:?}"),
        }

        if !config.reconnect.enabled {
            return Ok(());
        }
        attempt += 1;
        if attempt > config.reconnect.max_attempts {
            bail!(
                "exceeded {} reconnect attempts to {server_address}",
                config.reconnect.max_attempts
            );
        }
        info!(
            "reconnecting to {server_address} in {}s (attempt {attempt}/{})",
            config.reconnect.delay_seconds, config.reconnect.max_attempts
        );
        thread::sleep(Duration::from_secs(config.reconnect.delay_seconds));
    }
}

fn connect_and_serve(server_address: &str, name: &str, backend: &mut dyn DisplayBackend) -> Result<()> {
    let mut stream = TcpStream::connect(server_address)
        .with_context(loc!(), || format!("connecting to {server_address}"))?;
    stream.set_nodelay(true).location(loc!())?;

    let geometry = backend
        .geometry_get()
        .with_context(loc!(), || "querying local screen geometry")?;
    let screen = ScreenInfo {
        width: geometry.width,
        height: geometry.height,
    };
    Message::hello(name, Some(screen))
        .framed_write(&mut stream)
        .with_context(loc!(), || "sending hello")?;

    match Message::framed_read(&mut stream).with_context(loc!(), || "reading server hello")? {
        Message::Hello { name, .. } => info!("connected to server {name:?}"),
        other => bail!("expected hello from server, got {other:?}"),
    }

    loop {
        let message = Message::framed_read(&mut stream).with_context(loc!(), || "reading from server")?;
        dispatch(backend, geometry, message);
    }
}

fn dispatch(backend: &mut dyn DisplayBackend, geometry: ScreenGeometry, message: Message) {
    match message {
        Message::MouseEvent {
            event,
            norm_x,
            norm_y,
            button,
            delta,
        } => dispatch_mouse(backend, geometry, event, NormalizedPoint::new(norm_x, norm_y), button, delta),
        Message::KeyEvent { event, keycode, keysym } => {
            let kind = match event {
                KeyEventKind::Press => InputEventKind::KeyPress,
                KeyEventKind::Release => InputEventKind::KeyRelease,
            };
            backend.inject_event(RawInputEvent::key(kind, keycode, keysym, Modifiers::default()));
        },
        Message::Keepalive => {},
        Message::Error { message } => warn!("server reported error: {message}"),
        other @ (Message::Hello { .. } | Message::ScreenInfo { .. }) => {
            debug!("unexpected message after handshake: {other:?}");
        },
    }
}

fn dispatch_mouse(
    backend: &mut dyn DisplayBackend,
    geometry: ScreenGeometry,
    event: MouseEventKind,
    np: NormalizedPoint,
    button: Option<u32>,
    delta: Option<i32>,
) {
    if np.is_hide_signal() {
        backend.cursor_hide();
        return;
    }
    backend.cursor_show();
    let pos = geometry.denormalize(np);
    match event {
        MouseEventKind::Move => backend.pointer_warp(pos),
        MouseEventKind::Press => {
            backend.pointer_warp(pos);
            backend.inject_event(RawInputEvent::button(
                InputEventKind::ButtonPress,
                button.unwrap_or(1),
                Modifiers::default(),
            ));
        },
        MouseEventKind::Release => {
            backend.pointer_warp(pos);
            backend.inject_event(RawInputEvent::button(
                InputEventKind::ButtonRelease,
                button.unwrap_or(1),
                Modifiers::default(),
            ));
        },
        MouseEventKind::Scroll => {
            backend.pointer_warp(pos);
            backend.inject_event(RawInputEvent::scroll(delta.unwrap_or(0), Modifiers::default()));
        },
    }
}
