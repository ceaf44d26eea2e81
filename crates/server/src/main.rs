//! Reference TCP server: a thin, fixed-size worker pool reading framed
//! requests off a channel and dispatching each one straight into a
//! `cachecore_store::Store`. No business logic lives here — every arm below
//! is a single call into the store, translated to and from the wire shapes
//! in `protocol`.

mod config;
mod protocol;

use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use cachecore_store::{Store, StoreConfig};
use clap::Parser;

use config::{Cli, NodeConfig};
use protocol::{
    read_request, write_frame, write_terminator, AvailableItemsFrame, ErrorInfo, RecordStreamFrame, Request, Response,
};

const WORKER_COUNT: usize = 8;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = NodeConfig::load(&cli.config)?.apply_cli(&cli);

    let store = Arc::new(Store::open(StoreConfig {
        data_path: config.data_path.clone(),
    })?);

    let listener = TcpListener::bind(("0.0.0.0", config.tcp_port))?;
    log::info!(
        "cachecore-server listening on {} (data path {})",
        listener.local_addr()?,
        config.data_path.display()
    );

    // `mpsc::Receiver` isn't `Sync`; workers take turns pulling a connection
    // off it through a lock, then drop the lock before serving it.
    let (sender, receiver) = mpsc::channel::<TcpStream>();
    let receiver = Arc::new(std::sync::Mutex::new(receiver));

    for worker_id in 0..WORKER_COUNT {
        let receiver = Arc::clone(&receiver);
        let store = Arc::clone(&store);
        thread::Builder::new()
            .name(format!("cachecore-worker-{worker_id}"))
            .spawn(move || loop {
                let stream = {
                    let receiver = receiver.lock().expect("worker channel lock poisoned");
                    match receiver.recv() {
                        Ok(stream) => stream,
                        Err(_) => break,
                    }
                };
                if let Err(err) = handle_connection(&store, stream) {
                    log::warn!("connection on worker {worker_id} ended with an error: {err}");
                }
            })
            .expect("failed to spawn worker thread");
    }

    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                if sender.send(stream).is_err() {
                    break;
                }
            }
            Err(err) => log::warn!("failed to accept connection: {err}"),
        }
    }
    Ok(())
}

fn handle_connection(store: &Store, mut stream: TcpStream) -> Result<(), protocol::ProtocolError> {
    stream.set_nodelay(true).ok();
    let mut reader = stream.try_clone()?;
    loop {
        let request = match read_request(&mut reader)? {
            Some(request) => request,
            None => return Ok(()),
        };
        dispatch(store, request, &mut stream)?;
    }
}

fn dispatch(store: &Store, request: Request, out: &mut impl std::io::Write) -> Result<(), protocol::ProtocolError> {
    match request {
        Request::RegisterType(description) => {
            let response = match store.register_type(description) {
                Ok(()) => Response::Ack,
                Err(err) => Response::Error(ErrorInfo::from(&err)),
            };
            write_frame(out, &response)
        }
        Request::Put { type_name, record } => {
            let response = match store.put(&type_name, record) {
                Ok(()) => Response::Ack,
                Err(err) => Response::Error(ErrorInfo::from(&err)),
            };
            write_frame(out, &response)
        }
        Request::Remove { type_name, primary_key } => {
            let response = match store.remove(&type_name, &primary_key) {
                Ok(()) => Response::Ack,
                Err(err) => Response::Error(ErrorInfo::from(&err)),
            };
            write_frame(out, &response)
        }
        Request::GetOne {
            type_name,
            key_name,
            value,
        } => {
            let response = match store.get_one(&type_name, &key_name, &value) {
                Ok(record) => Response::OneRecord(record),
                Err(err) => Response::Error(ErrorInfo::from(&err)),
            };
            write_frame(out, &response)
        }
        Request::GetMany { type_name, query } => match store.get_many(&type_name, &query) {
            Ok(records) => {
                for record in records {
                    write_frame(out, &RecordStreamFrame::Item(record))?;
                }
                write_terminator(out)
            }
            Err(err) => {
                write_frame(out, &RecordStreamFrame::Error(ErrorInfo::from(&err)))?;
                write_terminator(out)
            }
        },
        Request::EvalQuery { type_name, query } => {
            let response = match store.eval_query(&type_name, &query) {
                Ok((authoritative, count)) => Response::EvalQueryResult { authoritative, count },
                Err(err) => Response::Error(ErrorInfo::from(&err)),
            };
            write_frame(out, &response)
        }
        Request::GetAvailableItems {
            type_name,
            keys,
            filter,
        } => match store.get_available_items(&type_name, &keys, filter.as_ref()) {
            Ok(result) => {
                for item in result.items {
                    write_frame(out, &AvailableItemsFrame::Item(item))?;
                }
                write_terminator(out)?;
                write_frame(out, &AvailableItemsFrame::NotFound(result.not_found))
            }
            Err(err) => {
                write_frame(out, &AvailableItemsFrame::Error(ErrorInfo::from(&err)))?;
                write_terminator(out)
            }
        },
        Request::GetObjectDescriptions { type_name, query } => {
            let response = match store.get_object_descriptions(&type_name, &query) {
                Ok(descriptions) => Response::ObjectDescriptions(descriptions),
                Err(err) => Response::Error(ErrorInfo::from(&err)),
            };
            write_frame(out, &response)
        }
        Request::Truncate { type_name } => {
            let response = match store.truncate(&type_name) {
                Ok(()) => Response::Ack,
                Err(err) => Response::Error(ErrorInfo::from(&err)),
            };
            write_frame(out, &response)
        }
        Request::DeleteMany { type_name, query } => {
            let response = match store.delete_many(&type_name, &query) {
                Ok(count) => Response::Count(count),
                Err(err) => Response::Error(ErrorInfo::from(&err)),
            };
            write_frame(out, &response)
        }
        Request::DeclareDomain {
            type_name,
            description,
            mode,
        } => {
            let response = match store.declare_domain(&type_name, description, mode) {
                Ok(()) => Response::Ack,
                Err(err) => Response::Error(ErrorInfo::from(&err)),
            };
            write_frame(out, &response)
        }
        Request::GetKnownTypes => write_frame(out, &Response::KnownTypes(store.get_known_types())),
        Request::GetServerDescription => {
            write_frame(out, &Response::ServerDescription(store.get_server_description()))
        }
        Request::GenerateUniqueIds { name, count } => {
            let response = match store.generate_unique_ids(&name, count) {
                Ok(range) => Response::UniqueIds {
                    start: range.start,
                    end: range.end,
                },
                Err(err) => Response::Error(ErrorInfo::from(&err)),
            };
            write_frame(out, &response)
        }
        Request::Dump { today } => {
            let response = match store.dump(&today) {
                Ok(path) => Response::DumpPath(path),
                Err(err) => Response::Error(ErrorInfo::from(&err)),
            };
            write_frame(out, &response)
        }
        Request::ImportDump { path } => {
            let response = match store.import_dump(&path) {
                Ok(()) => Response::Ack,
                Err(err) => Response::Error(ErrorInfo::from(&err)),
            };
            write_frame(out, &response)
        }
        Request::InitializeFromDump { path } => {
            let response = match store.initialize_from_dump(&path) {
                Ok(()) => Response::Ack,
                Err(err) => Response::Error(ErrorInfo::from(&err)),
            };
            write_frame(out, &response)
        }
    }
}
