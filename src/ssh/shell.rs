//! Shell channel pump
//!
//! One task per open shell owns the russh `Channel` and bridges it to the session's
//! [`ShellChannel`] queues.

use russh::client::Msg;
use russh::{Channel, ChannelMsg, Sig};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::config::PtySize;
use super::transport::{ChannelEvent, ChannelInput, ShellChannel};

/// Spawn the pump task for an interactive channel that already has a pty and shell
pub fn spawn_shell_pump(mut channel: Channel<Msg>, label: String) -> ShellChannel {
    let (input_tx, mut input_rx) = mpsc::channel::<ChannelInput>(1024);
    let (events_tx, events_rx) = mpsc::unbounded_channel::<ChannelEvent>();

    tokio::spawn(async move {
        debug!("Shell pump started for {}", label);

        loop {
            tokio::select! {
                input = input_rx.recv() => {
                    match input {
                        Some(ChannelInput::Data(data)) => {
                            if let Err(e) = channel.data(&data[..]).await {
                                error!("Failed to send data to SSH channel: {}", e);
                                let _ = events_tx.send(ChannelEvent::Closed);
                                break;
                            }
                        }
                        Some(ChannelInput::Resize(size)) => {
                            // Resize failure leaves the shell usable
                            if let Err(e) = channel.window_change(size.cols, size.rows, 0, 0).await {
                                error!("Failed to resize PTY: {}", e);
                            } else {
                                debug!("PTY resized to {}x{} for {}", size.cols, size.rows, label);
                            }
                        }
                        Some(ChannelInput::Close) | None => {
                            info!("Closing shell channel for {}", label);
                            let _ = channel.eof().await;
                            let _ = channel.close().await;
                            break;
                        }
                    }
                }

                msg = channel.wait() => {
                    let event = match msg {
                        Some(ChannelMsg::Data { data }) => ChannelEvent::Data(data.to_vec()),
                        // stderr shares the terminal
                        Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                            ChannelEvent::Data(data.to_vec())
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            info!("Remote exit status {} for {}", exit_status, label);
                            ChannelEvent::ExitStatus(exit_status)
                        }
                        Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                            info!("Remote exit signal {:?} for {}", signal_name, label);
                            ChannelEvent::ExitSignal(signal_label(&signal_name))
                        }
                        Some(ChannelMsg::WindowChange { col_width, row_height, .. }) => {
                            ChannelEvent::WindowChange(PtySize::new(row_height, col_width))
                        }
                        Some(ChannelMsg::Eof) => {
                            debug!("SSH channel EOF for {}", label);
                            continue;
                        }
                        Some(ChannelMsg::Close) | None => {
                            info!("SSH channel closed for {}", label);
                            let _ = events_tx.send(ChannelEvent::Closed);
                            break;
                        }
                        Some(_) => continue,
                    };

                    if events_tx.send(event).is_err() {
                        debug!("Session stopped listening to {}", label);
                        let _ = channel.close().await;
                        break;
                    }
                }
            }
        }

        debug!("Shell pump terminated for {}", label);
    });

    ShellChannel {
        input: input_tx,
        events: events_rx,
    }
}

fn signal_label(sig: &Sig) -> String {
    match sig {
        Sig::Custom(name) => name.clone(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_label() {
        assert_eq!(signal_label(&Sig::TERM), "TERM");
        assert_eq!(signal_label(&Sig::Custom("XCPU".to_string())), "XCPU");
    }
}
