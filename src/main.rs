use clap::{Arg, ArgAction, Command};
use std::error::Error;
use std::sync::Arc;

use libsyncr::config::Config;
use libsyncr::local_store::LocalStore;
use libsyncr::logging::{info, init_tracing};
use libsyncr::object_store::{bucket_name_for_profile, ObjectStoreSettings, S3ObjectStore};
use libsyncr::profile::{registry_path, ProfilePatch, Registry};
use libsyncr::rag_client::HttpRagClient;
use libsyncr::reconcile::{Reconciler, SnapshotCache};
use libsyncr::sync_ops::SyncOperations;

fn cli() -> Command {
	Command::new("ragvideo-sync")
		.version(env!("CARGO_PKG_VERSION"))
		.author("Szilard Hajba <szilu@symbion.hu>")
		.about("Library synchronization core for RAGVideo's MinIO bundles and Dify knowledge bases")
		.subcommand_required(true)
		.arg(Arg::new("profile").short('p').long("profile").value_name("PROFILE").help("Profile to operate against"))
		.subcommand(Command::new("scan").about("Reconcile local, object-store, and RAG state"))
		.subcommand(
			Command::new("push")
				.about("Upload a local item's bundle and RAG documents")
				.arg(Arg::new("item_id").required(true))
				.arg(Arg::new("no-note").long("no-note").action(ArgAction::SetTrue))
				.arg(Arg::new("no-transcript").long("no-transcript").action(ArgAction::SetTrue))
				.arg(Arg::new("update-dify").long("update-dify").action(ArgAction::SetTrue)),
		)
		.subcommand(
			Command::new("pull")
				.about("Download a bundle by source key")
				.arg(Arg::new("source_key").required(true))
				.arg(Arg::new("overwrite").long("overwrite").action(ArgAction::SetTrue)),
		)
		.subcommand(
			Command::new("copy")
				.about("Duplicate an item under a fresh identity")
				.arg(Arg::new("source_key").required(true))
				.arg(Arg::new("from").long("from").value_name("local|remote").default_value("local"))
				.arg(Arg::new("create-dify-docs").long("create-dify-docs").action(ArgAction::SetTrue)),
		)
		.subcommand(
			Command::new("delete-remote")
				.about("Tombstone an item remotely")
				.arg(Arg::new("source_key").required(true))
				.arg(Arg::new("delete-dify").long("delete-dify").action(ArgAction::SetTrue)),
		)
		.subcommand(
			Command::new("profile")
				.about("Manage configuration profiles")
				.subcommand_required(true)
				.subcommand(Command::new("list"))
				.subcommand(Command::new("use").arg(Arg::new("name").required(true)))
				.subcommand(
					Command::new("upsert")
						.arg(Arg::new("name").required(true))
						.arg(Arg::new("base-url").long("base-url"))
						.arg(Arg::new("dataset-id").long("dataset-id")),
				)
				.subcommand(Command::new("delete").arg(Arg::new("name").required(true))),
		)
}

struct Session {
	ops: SyncOperations,
	profile: libsyncr::profile::Profile,
	profile_name: String,
	bucket: String,
}

async fn make_session(profile_name: &str) -> Result<Session, Box<dyn Error>> {
	let config_path = libsyncr::profile::config_dir().join("config.toml");
	let config = Config::load(&config_path);

	let mut registry = Registry::load(&registry_path()).await?;
	if !profile_name.is_empty() {
		registry.set_active_profile(profile_name)?;
	}
	let profile = registry.get().clone();
	let active_name = registry.active_profile.clone();
	let bucket = bucket_name_for_profile(&config.object_store.bucket_prefix, &active_name);

	let object_store_settings = ObjectStoreSettings {
		endpoint: config.object_store.endpoint.clone(),
		access_key: config.object_store.access_key.clone(),
		secret_key: config.object_store.secret_key.clone(),
		use_tls: config.object_store.use_tls,
		region: config.object_store.region.clone(),
		bucket_prefix: config.object_store.bucket_prefix.clone(),
	};
	let object_store = Arc::new(S3ObjectStore::connect(&object_store_settings).await);

	let note_knowledge = Arc::new(HttpRagClient::new(profile.base_url.clone(), profile.service_api_key.clone(), profile.app_api_key.clone(), profile.timeout_seconds)?);
	let transcript_knowledge = Arc::new(HttpRagClient::new(profile.base_url.clone(), profile.service_api_key.clone(), profile.app_api_key.clone(), profile.timeout_seconds)?);

	let local = Arc::new(LocalStore::new(config.local_store_root.clone()));
	let ops = SyncOperations { local, object_store, note_knowledge, transcript_knowledge };
	Ok(Session { ops, profile, profile_name: active_name, bucket })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	init_tracing();
	let matches = cli().get_matches();
	let profile_flag = matches.get_one::<String>("profile").cloned().unwrap_or_default();

	match matches.subcommand() {
		Some(("scan", _)) => {
			let session = make_session(&profile_flag).await?;
			let cache_path = libsyncr::profile::config_dir().join("sync_items.redb");
			let cache = Arc::new(SnapshotCache::open(&cache_path)?);
			let reconciler = Reconciler {
				local: session.ops.local.clone(),
				object_store: session.ops.object_store.clone(),
				note_knowledge: session.ops.note_knowledge.clone(),
				transcript_knowledge: session.ops.transcript_knowledge.clone(),
				cache,
			};
			info!(profile = %session.profile_name, bucket = %session.bucket, "scanning");
			let items = reconciler.scan(&session.profile, &session.profile_name, &session.bucket).await?;
			println!("{}", serde_json::to_string_pretty(&items.iter().map(|i| i.source_key.clone()).collect::<Vec<_>>())?);
		}
		Some(("push", sub)) => {
			let session = make_session(&profile_flag).await?;
			let item_id = sub.get_one::<String>("item_id").unwrap();
			let include_note = !sub.get_flag("no-note");
			let include_transcript = !sub.get_flag("no-transcript");
			let update_dify = sub.get_flag("update-dify");
			info!(item_id = %item_id, profile = %session.profile_name, "pushing");
			let outcome = session.ops.push(&session.bucket, &session.profile, item_id, include_transcript, include_note, update_dify).await?;
			println!("{}", serde_json::to_string_pretty(&serde_json::json!({
				"uploaded": outcome.uploaded,
				"bundle_sha256": outcome.bundle_sha256,
				"note_document_id": outcome.note_document_id,
				"transcript_document_id": outcome.transcript_document_id,
				"dify_error": outcome.dify_error,
			}))?);
		}
		Some(("pull", sub)) => {
			let session = make_session(&profile_flag).await?;
			let source_key = sub.get_one::<String>("source_key").unwrap();
			let overwrite = sub.get_flag("overwrite");
			info!(source_key = %source_key, profile = %session.profile_name, "pulling");
			let outcome = session.ops.pull(&session.bucket, source_key, overwrite).await?;
			println!("{}", serde_json::to_string_pretty(&serde_json::json!({
				"task_id": outcome.task_id,
				"wrote_note": outcome.wrote_note,
				"wrote_transcript": outcome.wrote_transcript,
				"wrote_audio": outcome.wrote_audio,
			}))?);
		}
		Some(("copy", sub)) => {
			let session = make_session(&profile_flag).await?;
			let source_key = sub.get_one::<String>("source_key").unwrap();
			let from_local = sub.get_one::<String>("from").map(|s| s.as_str()) != Some("remote");
			let create_dify_docs = sub.get_flag("create-dify-docs");
			info!(source_key = %source_key, profile = %session.profile_name, "copying");
			let outcome = session.ops.copy(&session.bucket, &session.profile, source_key, from_local, true, true, create_dify_docs, None).await?;
			println!("{}", serde_json::to_string_pretty(&serde_json::json!({
				"task_id": outcome.task_id,
				"source_key": outcome.source_key,
				"sync_id": outcome.sync_id,
				"dify_error": outcome.dify_error,
			}))?);
		}
		Some(("delete-remote", sub)) => {
			let session = make_session(&profile_flag).await?;
			let source_key = sub.get_one::<String>("source_key").unwrap();
			let delete_dify = sub.get_flag("delete-dify");
			info!(source_key = %source_key, profile = %session.profile_name, "deleting remotely");
			let outcome = session
				.ops
				.delete_remote(&session.bucket, &session.profile_name, source_key, delete_dify, &session.profile.note_dataset_id, &session.profile.transcript_dataset_id, None, None)
				.await?;
			println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "dify_error": outcome.dify_error }))?);
		}
		Some(("profile", sub)) => {
			let registry_path = registry_path();
			let mut registry = Registry::load(&registry_path).await?;
			match sub.subcommand() {
				Some(("list", _)) => {
					for (name, profile) in registry.list_profiles() {
						let marker = if *name == registry.active_profile { "*" } else { " " };
						println!("{} {} ({})", marker, name, profile.base_url);
					}
				}
				Some(("use", sub)) => {
					let name = sub.get_one::<String>("name").unwrap();
					registry.set_active_profile(name)?;
					registry.save(&registry_path).await?;
					println!("active profile: {}", name);
				}
				Some(("upsert", sub)) => {
					let name = sub.get_one::<String>("name").unwrap();
					let patch = ProfilePatch {
						base_url: sub.get_one::<String>("base-url").cloned(),
						dataset_id: sub.get_one::<String>("dataset-id").cloned(),
						..Default::default()
					};
					registry.upsert_profile(name, patch, None, true)?;
					registry.save(&registry_path).await?;
					println!("profile '{}' updated", name);
				}
				Some(("delete", sub)) => {
					let name = sub.get_one::<String>("name").unwrap();
					registry.delete_profile(name)?;
					registry.save(&registry_path).await?;
					println!("profile '{}' deleted", name);
				}
				_ => unreachable!(),
			}
		}
		_ => unreachable!(),
	}

	Ok(())
}

// vim: ts=4
