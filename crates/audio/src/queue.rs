//! File de lecture FIFO avec interruption
//!
//! La file est partagée entre la tâche async (qui ajoute les chunks reçus du
//! socket) et le callback temps réel de cpal (qui consomme les échantillons).
//! Elle ne fait aucune I/O : c'est une structure de données pure, testable
//! sans périphérique.
//!
//! ```text
//! socket → enqueue() → [pending ...] → play_next() → current → fill() → haut-parleurs
//!                            └────────── interrupt() : tout est jeté d'un coup
//! ```

use std::collections::VecDeque;

use crate::{AudioChunk, PlaybackStats, Sample};

/// Nombre de numéros de séquence joués conservés pour l'observation
const PLAYED_HISTORY_LIMIT: usize = 256;

/// Chunks retirés de la file par une interruption
#[derive(Debug, Default)]
pub struct Discarded {
    pending: VecDeque<AudioChunk>,
    current: Option<AudioChunk>,
}

impl Discarded {
    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// File de lecture des chunks décodés
///
/// Garantie d'ordre : les chunks sont joués dans l'ordre d'`enqueue`,
/// sans priorité ni réordonnancement.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    /// Chunks en attente, tête = prochain à jouer
    pending: VecDeque<AudioChunk>,

    /// Chunk en cours de lecture
    current: Option<AudioChunk>,

    /// Position de lecture dans le chunk courant
    position: usize,

    /// Passage à vide non encore consommé par `take_drained()`
    drained: bool,

    /// Séquences jouées jusqu'au bout, dans l'ordre (bornée)
    played: VecDeque<u64>,

    stats: PlaybackStats,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute un chunk en fin de file
    ///
    /// Si rien n'est en cours de lecture, la tête est démarrée immédiatement.
    /// Retourne `true` dans ce cas.
    pub fn enqueue(&mut self, chunk: AudioChunk) -> bool {
        self.stats.chunks_enqueued += 1;
        self.pending.push_back(chunk);

        if self.current.is_none() {
            self.drained = false;
            self.play_next();
            true
        } else {
            false
        }
    }

    /// Termine le chunk courant et démarre la tête de file
    ///
    /// Retourne le numéro de séquence du chunk démarré, ou `None` si la file
    /// est vide, auquel cas la lecture passe à l'état inactif.
    pub fn play_next(&mut self) -> Option<u64> {
        if let Some(finished) = self.current.take() {
            self.stats.chunks_played += 1;
            if self.played.len() == PLAYED_HISTORY_LIMIT {
                self.played.pop_front();
            }
            self.played.push_back(finished.sequence_number);
        }
        self.position = 0;

        match self.pending.pop_front() {
            Some(chunk) => {
                let sequence = chunk.sequence_number;
                self.current = Some(chunk);
                Some(sequence)
            }
            None => {
                self.drained = true;
                None
            }
        }
    }

    /// Remplit un buffer de sortie avec les échantillons disponibles
    ///
    /// Appelé depuis le callback audio : enchaîne les chunks sans trou et
    /// complète avec du silence quand la file est vide. Retourne le nombre
    /// d'échantillons réellement joués.
    pub fn fill(&mut self, output: &mut [Sample]) -> usize {
        let mut written = 0;

        while written < output.len() {
            let Some(chunk) = self.current.as_ref() else { break };

            let remaining = &chunk.samples[self.position.min(chunk.samples.len())..];
            let count = remaining.len().min(output.len() - written);
            output[written..written + count].copy_from_slice(&remaining[..count]);
            written += count;
            self.position += count;

            if self.position >= chunk.samples.len() {
                self.play_next();
            }
        }

        for sample in &mut output[written..] {
            *sample = 0.0;
        }
        written
    }

    /// Coupe le chunk courant et vide la file en une seule troncature
    ///
    /// Après l'appel : `len() == 0` et `is_playing() == false`, quelle que
    /// soit la profondeur de la file. Une interruption n'est pas un passage
    /// à vide naturel : aucun `drained` n'est levé.
    pub fn interrupt(&mut self) -> usize {
        self.detach().len()
    }

    /// Comme `interrupt()`, mais rend les chunks retirés
    ///
    /// Sous verrou partagé avec le callback audio, l'appelant libère le
    /// `Discarded` après avoir relâché le verrou.
    pub fn detach(&mut self) -> Discarded {
        let discarded = Discarded {
            pending: std::mem::take(&mut self.pending),
            current: self.current.take(),
        };
        self.position = 0;
        self.drained = false;

        if !discarded.is_empty() {
            self.stats.interruptions += 1;
            self.stats.chunks_discarded += discarded.len() as u64;
        }
        discarded
    }

    /// Consomme l'indicateur de passage à vide
    pub fn take_drained(&mut self) -> bool {
        std::mem::take(&mut self.drained)
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    /// Nombre de chunks en attente (hors chunk courant)
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.current.is_none()
    }

    /// Séquence du chunk en cours de lecture
    pub fn current_sequence(&self) -> Option<u64> {
        self.current.as_ref().map(|chunk| chunk.sequence_number)
    }

    /// Séquences jouées jusqu'au bout, dans l'ordre de lecture
    pub fn played(&self) -> Vec<u64> {
        self.played.iter().copied().collect()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats.clone()
    }

    /// Compte un underrun constaté par le périphérique
    pub fn record_underrun(&mut self) {
        self.stats.underruns += 1;
    }
}
