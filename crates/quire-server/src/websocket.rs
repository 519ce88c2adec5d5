//! Live-reload messages and the browser client that consumes them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Messages pushed to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HmrMessage {
    /// Connection established
    Connected,

    /// Reload pages showing this section
    Reload { section: String },

    /// Replace one injected style block in pages showing this section
    UpdateStyle {
        section: String,
        /// Value of the block's `data-quire-style` attribute
        id: String,
        css: String,
    },

    /// A rebuild failed; the previous output is still being served
    Error { section: String, message: String },
}

/// Fan-out of reload messages to every open socket.
#[derive(Debug, Clone)]
pub struct HmrHub {
    sender: broadcast::Sender<HmrMessage>,
}

impl HmrHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    pub fn send(&self, msg: HmrMessage) {
        // No receivers is fine: nobody has a page open yet.
        let _ = self.sender.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HmrMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for HmrHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate the browser client.
///
/// The page's section is derived from its path once `public_path` is
/// stripped: `<Section>.html`, or `default_section` for the site root.
/// Messages for other sections are ignored.
pub fn hmr_client_script(
    ws_path: &str,
    default_section: Option<&str>,
    public_path: &str,
) -> String {
    let default_section =
        serde_json::to_string(&default_section).unwrap_or_else(|_| "null".into());
    let ws_path = serde_json::to_string(ws_path).unwrap_or_else(|_| "\"\"".into());
    let public_path =
        serde_json::to_string(public_path.trim_matches('/')).unwrap_or_else(|_| "\"\"".into());

    format!(
        r#"
(function() {{
  'use strict';

  const defaultSection = {default_section};
  const publicPath = {public_path};
  let path = decodeURIComponent(location.pathname).replace(/^\//, '');
  if (publicPath && (path === publicPath || path.startsWith(publicPath + '/'))) {{
    path = path.slice(publicPath.length).replace(/^\//, '');
  }}
  const section = path === '' ? defaultSection : path.replace(/\.html$/, '');
  const scheme = location.protocol === 'https:' ? 'wss://' : 'ws://';
  let reconnectAttempts = 0;
  const maxReconnectAttempts = 10;

  function showError(message) {{
    let overlay = document.getElementById('__quire-error');
    if (!overlay) {{
      overlay = document.createElement('pre');
      overlay.id = '__quire-error';
      overlay.style.cssText = 'position:fixed;left:0;right:0;bottom:0;margin:0;' +
        'padding:1em;max-height:50vh;overflow:auto;background:#300;color:#fcc;' +
        'font:12px monospace;z-index:2147483647';
      document.body.appendChild(overlay);
    }}
    overlay.textContent = message;
  }}

  function clearError() {{
    const overlay = document.getElementById('__quire-error');
    if (overlay) overlay.remove();
  }}

  function connect() {{
    const ws = new WebSocket(scheme + location.host + {ws_path});

    ws.onopen = function() {{
      reconnectAttempts = 0;
    }};

    ws.onmessage = function(event) {{
      const msg = JSON.parse(event.data);
      if (msg.type === 'connected' || msg.section !== section) return;

      switch (msg.type) {{
        case 'reload':
          location.reload();
          break;

        case 'update_style': {{
          const selector = 'style[data-quire-style="' + CSS.escape(msg.id) + '"]';
          const block = document.querySelector(selector);
          if (block) {{
            block.textContent = msg.css;
            clearError();
          }} else {{
            location.reload();
          }}
          break;
        }}

        case 'error':
          console.error('[quire] ' + msg.message);
          showError(msg.message);
          break;
      }}
    }};

    ws.onclose = function() {{
      if (reconnectAttempts < maxReconnectAttempts) {{
        reconnectAttempts++;
        setTimeout(connect, 1000 * reconnectAttempts);
      }}
    }};
  }}

  connect();
}})();
"#
    )
}
