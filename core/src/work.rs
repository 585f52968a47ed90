// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
use std::net::TcpStream;
use std::sync::Weak;

use crate::listener::Listener;

/// The accept-time record that carries a socket and its ACL verdict to a worker.
///
/// Owns the accepted socket exclusively; the socket is closed when this value is
/// dropped, which happens after the worker finishes handling it.
pub struct SocketWork {
    listener: Weak<Listener>,
    socket: TcpStream,
    pub forbidden: bool,
}

impl SocketWork {
    pub fn new(listener: Weak<Listener>, socket: TcpStream, forbidden: bool) -> SocketWork {
        SocketWork { listener, socket, forbidden }
    }

    pub fn listener(&self) -> Option<std::sync::Arc<Listener>> { self.listener.upgrade() }

    pub fn socket(&self) -> &TcpStream { &self.socket }

    pub fn socket_mut(&mut self) -> &mut TcpStream { &mut self.socket }

    pub fn client_address(&self) -> std::io::Result<std::net::SocketAddr> { self.socket.peer_addr() }
}
