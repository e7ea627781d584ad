use crate::cpu::Cpu;
use crate::memory::{Memory, MemoryError};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

/// One CPU wired to one 64KB memory. The host run-loop owns a `Machine`,
/// feeds it key presses and cycle budgets, and reads registers or memory
/// between instructions.
pub struct Machine {
    pub memory: Rc<RefCell<Memory>>,
    pub cpu: Cpu,
}

impl Machine {
    pub fn new() -> Self {
        let memory = Rc::new(RefCell::new(Memory::new()));
        let cpu = Cpu::new(memory.clone());
        Self { memory, cpu }
    }

    /// Load a raw ROM image into memory at `start`
    pub fn load_rom<P: AsRef<Path>>(&mut self, path: P, start: u16) -> Result<usize, MemoryError> {
        self.memory.borrow_mut().load_rom(path, start)
    }

    /// Reset the CPU through the reset vector
    pub fn reset(&mut self) {
        self.cpu.reset();
    }

    /// Latch a key code for the running program
    pub fn key_press(&mut self, code: u8) {
        self.memory.borrow_mut().key_press(code);
    }

    /// Run for at least `cycle_budget` cycles; returns cycles consumed
    pub fn run(&mut self, cycle_budget: u32) -> u32 {
        self.cpu.execute(cycle_budget)
    }
}
