//! Pipeline arena: owns every stage and evaluates tile requests.
//!
//! # Overview
//!
//! Stages are added with the ids of their inputs; inputs must already
//! exist, so the graph is acyclic by construction. Evaluation is
//! synchronous and pull-based: asking a stage for a tile runs its
//! `get_tile`, which pulls from its inputs depth-first within the same
//! call stack.
//!
//! ```text
//! source ──► counting ──► cache ──► remap      get_tile(remap)
//!                                                 └─ get_tile(cache)
//!                                                      └─ get_tile(counting) x N
//!                                                           └─ get_tile(source)
//! ```
//!
//! While a stage runs it is moved out of its slot, so a stage that
//! (indirectly) asks for its own tile gets [`FilterError::StageBusy`]
//! instead of aliasing its own state.
//!
//! # Example
//!
//! ```rust
//! use tilechain_core::prelude::*;
//! use tilechain_filters::{CachingFilter, MemorySource, Pipeline, ScalarRemapFilter};
//!
//! let image = PixelBuffer::from_values(ScalarType::U16, 1, IRect::from_size(2, 2),
//!     &[0.0, 65535.0, 13107.0, 65535.0]).unwrap();
//!
//! let mut pipeline = Pipeline::new();
//! let src = pipeline.add("source", MemorySource::new(image), &[]).unwrap();
//! let cache = pipeline.chain("cache", CachingFilter::new(), src).unwrap();
//! let remap = pipeline.chain("remap", ScalarRemapFilter::new(ScalarType::U8), cache).unwrap();
//!
//! let tile = pipeline.get_tile(remap, &TileRequest::full_res(IRect::from_size(2, 2))).unwrap();
//! assert_eq!(tile.band_slice::<u8>(0), Some(&[0u8, 255, 51, 255][..]));
//! ```

use std::fmt;

use tracing::debug;
use tilechain_core::{DPoint, IRect, ISize, ScalarType, TileRef, TileRequest};

use crate::{
    load_state, save_state, FilterError, FilterResult, ImageSource, Keywordlist, PropertyValue,
    TileLayout,
};

/// Index of a stage inside its [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(usize);

impl StageId {
    /// Position in the pipeline.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct Slot {
    name: String,
    source: Option<Box<dyn ImageSource>>,
    inputs: Vec<StageId>,
}

/// Metadata view of a stage's inputs.
///
/// Queries for a missing input (or one currently being evaluated) return
/// "unknown" values: `None`, [`ScalarType::Unknown`], zero bands, `0.0`.
#[derive(Clone, Copy)]
pub struct Upstream<'a> {
    slots: &'a [Slot],
    ids: &'a [StageId],
}

impl<'a> Upstream<'a> {
    /// A view with no inputs.
    pub fn none() -> Upstream<'static> {
        Upstream { slots: &[], ids: &[] }
    }

    /// Number of inputs.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if there are no inputs.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn resolve(&self, input: usize) -> Option<(&'a dyn ImageSource, Upstream<'a>)> {
        let id = self.ids.get(input)?;
        let slot = self.slots.get(id.0)?;
        let source = slot.source.as_deref()?;
        Some((
            source,
            Upstream {
                slots: self.slots,
                ids: &slot.inputs,
            },
        ))
    }

    /// Bounding rectangle of `input` at `res_level`.
    pub fn bounding_rect(&self, input: usize, res_level: u32) -> Option<IRect> {
        let (s, up) = self.resolve(input)?;
        s.bounding_rect(res_level, &up)
    }

    /// Output scalar type of `input`.
    pub fn scalar_type(&self, input: usize) -> ScalarType {
        self.resolve(input)
            .map_or(ScalarType::Unknown, |(s, up)| s.output_scalar_type(&up))
    }

    /// Output band count of `input`.
    pub fn bands(&self, input: usize) -> usize {
        self.resolve(input)
            .map_or(0, |(s, up)| s.number_of_output_bands(&up))
    }

    /// Native tile size of `input`.
    pub fn tile_size(&self, input: usize) -> Option<ISize> {
        let (s, up) = self.resolve(input)?;
        s.tile_size(&up)
    }

    /// Null value of `band` of `input`.
    pub fn null_pixel(&self, input: usize, band: usize) -> f64 {
        self.resolve(input)
            .map_or(0.0, |(s, up)| s.null_pixel(band, &up))
    }

    /// Minimum value of `band` of `input`.
    pub fn min_pixel(&self, input: usize, band: usize) -> f64 {
        self.resolve(input)
            .map_or(0.0, |(s, up)| s.min_pixel(band, &up))
    }

    /// Maximum value of `band` of `input`.
    pub fn max_pixel(&self, input: usize, band: usize) -> f64 {
        self.resolve(input)
            .map_or(0.0, |(s, up)| s.max_pixel(band, &up))
    }

    /// Valid-pixel quadrilateral of `input` at `res_level`.
    pub fn valid_vertices(&self, input: usize, res_level: u32) -> Option<[DPoint; 4]> {
        let (s, up) = self.resolve(input)?;
        s.valid_vertices(res_level, &up)
    }

    /// Full output layout of `input`.
    pub fn layout(&self, input: usize) -> Option<TileLayout> {
        let (s, up) = self.resolve(input)?;
        Some(s.output_layout(&up))
    }
}

/// Tile access to a stage's inputs during `get_tile`.
pub struct Inputs<'a> {
    slots: &'a mut [Slot],
    ids: &'a [StageId],
}

impl Inputs<'_> {
    /// Number of inputs.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if there are no inputs.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Pulls a tile from input `input`.
    pub fn get_tile(&mut self, input: usize, request: &TileRequest) -> FilterResult<TileRef> {
        let id = *self
            .ids
            .get(input)
            .ok_or_else(|| FilterError::invalid_inputs(format!("input {input}"), "not connected"))?;
        evaluate(&mut *self.slots, id, request)
    }

    /// Metadata view of the same inputs.
    pub fn upstream(&self) -> Upstream<'_> {
        Upstream {
            slots: &*self.slots,
            ids: self.ids,
        }
    }
}

fn evaluate(slots: &mut [Slot], id: StageId, request: &TileRequest) -> FilterResult<TileRef> {
    let slot = slots.get_mut(id.0).ok_or(FilterError::UnknownStage(id.0))?;
    let mut source = slot
        .source
        .take()
        .ok_or_else(|| FilterError::StageBusy(slot.name.clone()))?;
    let ids = slot.inputs.clone();
    let result = source.get_tile(
        request,
        &mut Inputs {
            slots: &mut *slots,
            ids: &ids,
        },
    );
    slots[id.0].source = Some(source);
    result
}

/// Owner of a directed acyclic graph of stages.
#[derive(Default)]
pub struct Pipeline {
    slots: Vec<Slot>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stage wired to `inputs` and initializes it.
    ///
    /// Fails if the stage does not accept that many inputs or an input id
    /// does not exist yet.
    pub fn add<S: ImageSource>(
        &mut self,
        name: impl Into<String>,
        source: S,
        inputs: &[StageId],
    ) -> FilterResult<StageId> {
        self.add_boxed(name, Box::new(source), inputs)
    }

    /// Boxed form of [`add`](Self::add).
    pub fn add_boxed(
        &mut self,
        name: impl Into<String>,
        source: Box<dyn ImageSource>,
        inputs: &[StageId],
    ) -> FilterResult<StageId> {
        let name = name.into();
        let id = StageId(self.slots.len());
        check_wiring(&name, source.as_ref(), id, inputs)?;
        debug!(stage = %name, kind = source.name(), %id, inputs = inputs.len(), "pipeline::add");
        self.slots.push(Slot {
            name,
            source: Some(source),
            inputs: inputs.to_vec(),
        });
        if let Err(e) = self.initialize(id) {
            self.slots.pop();
            return Err(e);
        }
        Ok(id)
    }

    /// Appends a single-input stage fed by `input`.
    pub fn chain<S: ImageSource>(
        &mut self,
        name: impl Into<String>,
        source: S,
        input: StageId,
    ) -> FilterResult<StageId> {
        self.add(name, source, &[input])
    }

    /// Rewires an existing stage and reinitializes it and its dependents.
    pub fn connect(&mut self, id: StageId, inputs: &[StageId]) -> FilterResult<()> {
        let slot = self.slots.get(id.0).ok_or(FilterError::UnknownStage(id.0))?;
        let source = slot
            .source
            .as_deref()
            .ok_or_else(|| FilterError::StageBusy(slot.name.clone()))?;
        check_wiring(&slot.name, source, id, inputs)?;
        self.slots[id.0].inputs = inputs.to_vec();
        self.initialize(id)?;
        self.initialize_dependents(id)
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if there are no stages.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Looks up a stage by name.
    pub fn find(&self, name: &str) -> Option<StageId> {
        self.slots.iter().position(|s| s.name == name).map(StageId)
    }

    /// Stage name.
    pub fn name(&self, id: StageId) -> Option<&str> {
        self.slots.get(id.0).map(|s| s.name.as_str())
    }

    /// Input ids of a stage.
    pub fn inputs(&self, id: StageId) -> Option<&[StageId]> {
        self.slots.get(id.0).map(|s| s.inputs.as_slice())
    }

    /// Runs `initialize` on one stage.
    pub fn initialize(&mut self, id: StageId) -> FilterResult<()> {
        let slot = self.slots.get_mut(id.0).ok_or(FilterError::UnknownStage(id.0))?;
        let mut source = slot
            .source
            .take()
            .ok_or_else(|| FilterError::StageBusy(slot.name.clone()))?;
        let slots = &self.slots;
        let result = source.initialize(&Upstream {
            slots,
            ids: &slots[id.0].inputs,
        });
        self.slots[id.0].source = Some(source);
        result
    }

    /// Runs `initialize` on every stage, inputs first.
    pub fn initialize_all(&mut self) -> FilterResult<()> {
        for i in 0..self.slots.len() {
            self.initialize(StageId(i))?;
        }
        Ok(())
    }

    fn initialize_dependents(&mut self, id: StageId) -> FilterResult<()> {
        let mut dirty = vec![false; self.slots.len()];
        dirty[id.0] = true;
        for i in id.0 + 1..self.slots.len() {
            if self.slots[i].inputs.iter().any(|inp| dirty[inp.0]) {
                dirty[i] = true;
                self.initialize(StageId(i))?;
            }
        }
        Ok(())
    }

    /// Evaluates a tile request on stage `id`.
    pub fn get_tile(&mut self, id: StageId, request: &TileRequest) -> FilterResult<TileRef> {
        evaluate(&mut self.slots, id, request)
    }

    fn with_source<R>(&self, id: StageId, f: impl FnOnce(&dyn ImageSource, &Upstream<'_>) -> R) -> Option<R> {
        let slot = self.slots.get(id.0)?;
        let source = slot.source.as_deref()?;
        Some(f(source, &Upstream {
            slots: &self.slots,
            ids: &slot.inputs,
        }))
    }

    /// Bounding rectangle of stage `id` at `res_level`.
    pub fn bounding_rect(&self, id: StageId, res_level: u32) -> Option<IRect> {
        self.with_source(id, |s, up| s.bounding_rect(res_level, up)).flatten()
    }

    /// Output scalar type of stage `id`.
    pub fn output_scalar_type(&self, id: StageId) -> ScalarType {
        self.with_source(id, |s, up| s.output_scalar_type(up))
            .unwrap_or(ScalarType::Unknown)
    }

    /// Output band count of stage `id`.
    pub fn number_of_output_bands(&self, id: StageId) -> usize {
        self.with_source(id, |s, up| s.number_of_output_bands(up)).unwrap_or(0)
    }

    /// Native tile size of stage `id`.
    pub fn tile_size(&self, id: StageId) -> Option<ISize> {
        self.with_source(id, |s, up| s.tile_size(up)).flatten()
    }

    /// Output layout of stage `id`.
    pub fn output_layout(&self, id: StageId) -> Option<TileLayout> {
        self.with_source(id, |s, up| s.output_layout(up))
    }

    /// Valid-pixel quadrilateral of stage `id` at `res_level`.
    pub fn valid_vertices(&self, id: StageId, res_level: u32) -> Option<[DPoint; 4]> {
        self.with_source(id, |s, up| s.valid_vertices(res_level, up)).flatten()
    }

    /// Reads a named property of stage `id`.
    pub fn property(&self, id: StageId, name: &str) -> Option<PropertyValue> {
        self.with_source(id, |s, _| s.property(name)).flatten()
    }

    /// Sets a named property and reinitializes the stages fed by `id`.
    ///
    /// The stage itself keeps its derived state consistent; stages
    /// downstream may depend on its metadata and are reinitialized.
    pub fn set_property(&mut self, id: StageId, name: &str, value: PropertyValue) -> FilterResult<()> {
        self.source_mut(id)?.set_property(name, value)?;
        self.initialize_dependents(id)
    }

    /// Mutates stage `id` as its concrete type, then reinitializes it and
    /// its dependents.
    pub fn configure<T: ImageSource>(&mut self, id: StageId, f: impl FnOnce(&mut T)) -> FilterResult<()> {
        let stage = self.stage_mut::<T>(id).ok_or_else(|| {
            FilterError::invalid_inputs(format!("{id}"), "stage has a different type")
        })?;
        f(stage);
        self.initialize(id)?;
        self.initialize_dependents(id)
    }

    /// Borrows stage `id` as its concrete type.
    pub fn stage<T: ImageSource>(&self, id: StageId) -> Option<&T> {
        let source: &dyn ImageSource = self.slots.get(id.0)?.source.as_deref()?;
        source.as_any().downcast_ref::<T>()
    }

    /// Mutably borrows stage `id` as its concrete type, without
    /// reinitializing anything.
    pub fn stage_mut<T: ImageSource>(&mut self, id: StageId) -> Option<&mut T> {
        let source: &mut dyn ImageSource = self.slots.get_mut(id.0)?.source.as_deref_mut()?;
        source.as_any_mut().downcast_mut::<T>()
    }

    fn source_mut(&mut self, id: StageId) -> FilterResult<&mut dyn ImageSource> {
        let slot = self.slots.get_mut(id.0).ok_or(FilterError::UnknownStage(id.0))?;
        match slot.source.as_deref_mut() {
            Some(s) => Ok(s),
            None => Err(FilterError::StageBusy(slot.name.clone())),
        }
    }

    /// Saves the properties of stage `id` into `kwl` under `prefix`.
    pub fn save_state(&self, id: StageId, kwl: &mut Keywordlist, prefix: &str) -> FilterResult<()> {
        let slot = self.slots.get(id.0).ok_or(FilterError::UnknownStage(id.0))?;
        let source = slot
            .source
            .as_deref()
            .ok_or_else(|| FilterError::StageBusy(slot.name.clone()))?;
        save_state(source, kwl, prefix);
        Ok(())
    }

    /// Restores the properties of stage `id` from `kwl`, then reinitializes
    /// it and its dependents.
    pub fn load_state(&mut self, id: StageId, kwl: &Keywordlist, prefix: &str) -> FilterResult<()> {
        load_state(self.source_mut(id)?, kwl, prefix)?;
        self.initialize(id)?;
        self.initialize_dependents(id)
    }
}

fn check_wiring(
    name: &str,
    source: &dyn ImageSource,
    id: StageId,
    inputs: &[StageId],
) -> FilterResult<()> {
    if !source.accepts_inputs(inputs.len()) {
        return Err(FilterError::invalid_inputs(
            name,
            format!("{} does not accept {} input(s)", source.name(), inputs.len()),
        ));
    }
    if let Some(bad) = inputs.iter().find(|inp| inp.0 >= id.0) {
        return Err(FilterError::invalid_inputs(
            name,
            format!("input {bad} is not an earlier stage"),
        ));
    }
    Ok(())
}
