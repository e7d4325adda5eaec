//! Localized string catalog
//!
//! Two-layer lookup: an optional per-language override table in front of
//! the built-in English table. Unknown keys fall back to English; keys
//! missing from both tables render as the key itself so a typo is visible
//! in the log instead of panicking mid-migration. Language selection
//! happens in the CLI; the engine only ever calls [`Catalog::tr`].

/// Built-in English table, the fallback for every language
const ENGLISH: &[(&str, &str)] = &[
    ("pair-start", "Migrating account pair"),
    ("pair-done", "Account pair finished"),
    ("pair-aborted", "Account pair aborted"),
    ("connect-failed-src", "Could not connect to the source server"),
    ("connect-failed-dst", "Could not connect to the destination server"),
    ("auth-failed-src", "Authentication failed on the source server"),
    ("auth-failed-dst", "Authentication failed on the destination server"),
    ("list-failed", "Could not list folders on the source server"),
    ("folder-start", "Copying folder"),
    ("folder-empty", "Folder is empty"),
    ("folder-select-failed", "Could not select folder on the source server"),
    ("folder-create-failed", "Could not create folder on the destination server"),
    ("msg-copied", "Message copied to the destination server"),
    ("msg-exists", "Message already exists on the destination server"),
    ("msg-no-identity", "Message-ID not found in header, message skipped"),
    ("msg-header-failed", "Could not fetch message header, message skipped"),
    ("msg-probe-failed", "Could not check for the message on the destination server, message skipped"),
    ("msg-body-failed", "Could not fetch message body, message skipped"),
    ("msg-append-failed", "Could not append message to the destination server"),
    ("flags-failed", "Could not restore message flags"),
    ("quota-exceeded", "Destination mailbox is over quota, pair aborted"),
    ("reconnecting", "Connection lost, reconnecting"),
    ("retries-exhausted", "Reconnection attempts exhausted"),
    ("interrupted", "Interrupted by user"),
    ("run-complete", "Migration run complete"),
];

/// Portuguese overrides (the original tool's language)
const PORTUGUESE: &[(&str, &str)] = &[
    ("pair-start", "Migrando par de contas"),
    ("pair-done", "Par de contas finalizado"),
    ("pair-aborted", "Par de contas abortado"),
    ("connect-failed-src", "Erro ao conectar no servidor de origem"),
    ("connect-failed-dst", "Erro ao conectar no servidor de destino"),
    ("auth-failed-src", "Erro na autenticação no servidor de origem"),
    ("auth-failed-dst", "Erro na autenticação no servidor de destino"),
    ("list-failed", "Erro ao listar as pastas do servidor de origem"),
    ("folder-start", "Copiando a pasta"),
    ("folder-empty", "A pasta está vazia"),
    ("folder-select-failed", "Erro ao selecionar a pasta no servidor de origem"),
    ("folder-create-failed", "Erro ao criar a pasta no servidor de destino"),
    ("msg-copied", "Mensagem copiada para o servidor de destino"),
    ("msg-exists", "Mensagem já existe no servidor de destino"),
    ("msg-no-identity", "Message-ID não encontrado no cabeçalho, mensagem ignorada"),
    ("msg-header-failed", "Erro ao buscar o cabeçalho da mensagem, mensagem ignorada"),
    ("msg-probe-failed", "Erro ao verificar a mensagem no servidor de destino, mensagem ignorada"),
    ("msg-body-failed", "Erro ao buscar a mensagem no servidor de origem, mensagem ignorada"),
    ("msg-append-failed", "Erro ao copiar a mensagem para o servidor de destino"),
    ("flags-failed", "Erro ao restaurar as flags da mensagem"),
    ("quota-exceeded", "Caixa de destino sem espaço, par abortado"),
    ("reconnecting", "Conexão perdida, reconectando"),
    ("retries-exhausted", "Tentativas de reconexão esgotadas"),
    ("interrupted", "Interrompido pelo usuário"),
    ("run-complete", "Migração concluída"),
];

/// String provider handed to the engine
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    overrides: &'static [(&'static str, &'static str)],
}

impl Catalog {
    /// Catalog for a language code; unknown codes fall back to English.
    pub fn for_language(code: Option<&str>) -> Self {
        let overrides = match code.map(str::to_ascii_lowercase).as_deref() {
            Some("pt") | Some("pt-br") => PORTUGUESE,
            _ => &[],
        };
        Self { overrides }
    }

    /// Look up a message, override table first, then built-in English.
    pub fn tr<'a>(&self, key: &'a str) -> &'a str {
        lookup(self.overrides, key)
            .or_else(|| lookup(ENGLISH, key))
            .unwrap_or(key)
    }
}

fn lookup(table: &'static [(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table
        .iter()
        .find_map(|(k, v)| if *k == key { Some(*v) } else { None })
}

#[cfg(test)]
mod tests {
    use super::Catalog;

    #[test]
    fn english_is_the_default() {
        let catalog = Catalog::for_language(None);
        assert_eq!(
            catalog.tr("msg-exists"),
            "Message already exists on the destination server"
        );
    }

    #[test]
    fn portuguese_overrides_apply() {
        let catalog = Catalog::for_language(Some("pt"));
        assert_eq!(
            catalog.tr("auth-failed-src"),
            "Erro na autenticação no servidor de origem"
        );
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        let catalog = Catalog::for_language(Some("xx"));
        assert_eq!(catalog.tr("folder-empty"), "Folder is empty");
    }

    #[test]
    fn unknown_key_renders_as_itself() {
        let catalog = Catalog::for_language(Some("pt"));
        assert_eq!(catalog.tr("no-such-key"), "no-such-key");
    }
}
