//! `list`, `filter`, and `template` subcommands: read-mostly inspection and
//! management of the catalogue (C7), filters (C8), and templates (C9).

use super::{FilterCommands, TemplateCommands};
use crate::filter::{Filter, Node};
use crate::model::{PrimaryView, Tag, song_warnings};
use crate::template::TemplateItem;

pub async fn list() -> anyhow::Result<()> {
    let config = crate::config::load();
    let store = super::open_store(&config).await?;

    for song in store.songs() {
        let default_tag = Tag::default();
        let manual = song
            .hash
            .and_then(|h| store.shared_data(h))
            .map(|shared| &shared.tag_manual)
            .unwrap_or(&default_tag);
        let view = PrimaryView {
            manual,
            id3: &song.tag_id3,
            file_name: &song.tag_file_name,
        };
        let hash_str = song.hash.map(|h| h.to_hex()).unwrap_or_else(|| "-".repeat(40));
        println!(
            "{hash_str}  {:<24} {:<32} {}",
            view.author().unwrap_or("?"),
            view.title().unwrap_or("?"),
            song.file_name,
        );
        for warning in song_warnings(&view, song.hash.and_then(|h| store.shared_data(h))) {
            println!("    ! {warning}");
        }
    }
    if !store.new_files().is_empty() {
        println!("({} file(s) pending hash)", store.new_files().len());
    }
    Ok(())
}

pub async fn filter(action: &FilterCommands) -> anyhow::Result<()> {
    let config = crate::config::load();
    let mut store = super::open_store(&config).await?;

    match action {
        FilterCommands::List => {
            for row in store.filters() {
                let star = if row.is_favorite { " *" } else { "" };
                println!("{:>4}  {}{star}", row.id, row.name);
            }
        }
        FilterCommands::Create { name } => {
            let id = store.create_filter(name).await?;
            println!("created filter {id} ({name})");
        }
        FilterCommands::Delete { id } => {
            store.del_filter(*id).await?;
            println!("deleted filter {id}");
        }
        FilterCommands::Show { id } => {
            let row = store
                .filters()
                .iter()
                .find(|f| f.id == *id)
                .ok_or_else(|| anyhow::anyhow!("no such filter: {id}"))?;
            println!("filter {} ({}):", row.id, row.name);
            print_node(&row.filter, row.filter.root(), 1);
            println!("matches {} song(s)", store.num_songs_matching_filter(&row.filter));
        }
    }
    Ok(())
}

fn print_node(filter: &Filter, idx: usize, depth: usize) {
    let indent = "  ".repeat(depth);
    match filter.node(idx) {
        Node::And(children) => {
            println!("{indent}AND");
            for &child in children {
                print_node(filter, child, depth + 1);
            }
        }
        Node::Or(children) => {
            println!("{indent}OR");
            for &child in children {
                print_node(filter, child, depth + 1);
            }
        }
        Node::Comparison {
            property,
            comparison,
            value,
        } => println!("{indent}{property:?} {comparison:?} {value:?}"),
        Node::Noop => println!("{indent}(always matches)"),
    }
}

pub async fn template(action: &TemplateCommands) -> anyhow::Result<()> {
    let config = crate::config::load();
    let mut store = super::open_store(&config).await?;

    match action {
        TemplateCommands::List => {
            for row in store.templates() {
                println!("{:>4}  {}  ({} filter(s))", row.id, row.name, row.items.len());
            }
        }
        TemplateCommands::Create { name } => {
            let id = store.create_template(name).await?;
            println!("created template {id} ({name})");
        }
        TemplateCommands::AddFilter {
            template_id,
            filter_id,
            duration_limit,
        } => {
            let mut row = store
                .templates()
                .iter()
                .find(|t| t.id == *template_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such template: {template_id}"))?;
            row.items.push(TemplateItem {
                filter_id: *filter_id,
                duration_limit: *duration_limit,
            });
            store.save_template(row).await?;
            println!("added filter {filter_id} to template {template_id}");
        }
        TemplateCommands::Delete { id } => {
            store.del_template(*id).await?;
            println!("deleted template {id}");
        }
    }
    Ok(())
}
