use crate::memory::Memory;
use crate::opcode::*;
use log::{trace, warn};
use std::cell::RefCell;
use std::rc::Rc;

/// 6502 CPU
pub struct Cpu {
    /// Accumulator
    pub a: u8,
    /// X register
    pub x: u8,
    /// Y register
    pub y: u8,
    /// Stack pointer: offset into the fixed stack page at $0100, grows
    /// downward and wraps mod 256
    pub sp: u8,
    /// Program counter; always points at the next byte to fetch
    pub pc: u16,
    /// Status register (processor flags)
    /// Bit 7: N (Negative)
    /// Bit 6: V (Overflow)
    /// Bit 5: - (unused, always 1)
    /// Bit 4: B (Break)
    /// Bit 3: D (Decimal mode; arithmetic here is always binary)
    /// Bit 2: I (Interrupt disable)
    /// Bit 1: Z (Zero)
    /// Bit 0: C (Carry)
    pub p: u8,
    /// Memory
    pub memory: Rc<RefCell<Memory>>,
    /// Total cycles executed since last reset
    total_cycles: u64,
}

// Status register flags
const FLAG_CARRY: u8 = 0b0000_0001;
const FLAG_ZERO: u8 = 0b0000_0010;
const FLAG_INTERRUPT: u8 = 0b0000_0100;
const FLAG_DECIMAL: u8 = 0b0000_1000;
const FLAG_BREAK: u8 = 0b0001_0000;
const FLAG_UNUSED: u8 = 0b0010_0000;
const FLAG_OVERFLOW: u8 = 0b0100_0000;
const FLAG_NEGATIVE: u8 = 0b1000_0000;

const STACK_BASE: u16 = 0x0100;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

impl Cpu {
    /// Create a new CPU with power-on register values. The program counter
    /// stays at 0 until one of the reset entry points runs.
    pub fn new(memory: Rc<RefCell<Memory>>) -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFF,
            pc: 0,
            p: FLAG_INTERRUPT | FLAG_UNUSED,
            memory,
            total_cycles: 0,
        }
    }

    /// Reset the CPU to its documented power-on state and load the program
    /// counter from the reset vector at $FFFC/$FFFD.
    pub fn reset(&mut self) {
        self.reset_bare();
        self.pc = self.memory.borrow().read_u16(RESET_VECTOR);
    }

    /// Reset the CPU to the same power-on state but force the program
    /// counter to 0, bypassing the reset vector. Harness mode for callers
    /// that place code themselves and set `pc` directly.
    pub fn reset_bare(&mut self) {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = 0xFF;
        self.p = FLAG_INTERRUPT | FLAG_UNUSED;
        self.pc = 0;
        self.total_cycles = 0;
    }

    /// Total number of cycles executed since the last reset
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Run instructions until at least `cycle_budget` cycles have been
    /// consumed. Returns the cycles actually consumed, which may overshoot
    /// the budget by a partial instruction: an instruction that has begun
    /// always runs to completion.
    pub fn execute(&mut self, cycle_budget: u32) -> u32 {
        let mut consumed = 0;
        while consumed < cycle_budget {
            consumed += self.step() as u32;
        }
        consumed
    }

    /// Execute a single instruction and return the number of cycles it
    /// consumed. Afterwards `pc` points exactly at the next opcode byte.
    pub fn step(&mut self) -> u8 {
        let opcode_pc = self.pc;
        let opcode_byte = self.read_byte();

        let mut cycles = match lookup(opcode_byte) {
            Some(op) => {
                trace!("{opcode_pc:#06X}  {}", op.name());
                op.cycles
            }
            None => {
                // Unassigned byte: report it and keep decoding at the next
                // byte. Charged the minimum instruction cost so a budgeted
                // run always makes forward progress.
                warn!("unknown opcode {opcode_byte:#04X} at {opcode_pc:#06X}");
                2
            }
        };

        match opcode_byte {
            ADC_IMM => {
                let value = self.read_byte();
                self.adc(value);
            }
            ADC_ZP => {
                let addr = self.addr_zp();
                let value = self.read(addr);
                self.adc(value);
            }
            ADC_ZPX => {
                let addr = self.addr_zpx();
                let value = self.read(addr);
                self.adc(value);
            }
            ADC_ABS => {
                let addr = self.addr_abs();
                let value = self.read(addr);
                self.adc(value);
            }
            ADC_ABSX => {
                let (addr, crossed) = self.addr_absx();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.adc(value);
            }
            ADC_ABSY => {
                let (addr, crossed) = self.addr_absy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.adc(value);
            }
            ADC_INDX => {
                let addr = self.addr_indx();
                let value = self.read(addr);
                self.adc(value);
            }
            ADC_INDY => {
                let (addr, crossed) = self.addr_indy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.adc(value);
            }
            AND_IMM => {
                let value = self.read_byte();
                self.and(value);
            }
            AND_ZP => {
                let addr = self.addr_zp();
                let value = self.read(addr);
                self.and(value);
            }
            AND_ZPX => {
                let addr = self.addr_zpx();
                let value = self.read(addr);
                self.and(value);
            }
            AND_ABS => {
                let addr = self.addr_abs();
                let value = self.read(addr);
                self.and(value);
            }
            AND_ABSX => {
                let (addr, crossed) = self.addr_absx();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.and(value);
            }
            AND_ABSY => {
                let (addr, crossed) = self.addr_absy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.and(value);
            }
            AND_INDX => {
                let addr = self.addr_indx();
                let value = self.read(addr);
                self.and(value);
            }
            AND_INDY => {
                let (addr, crossed) = self.addr_indy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.and(value);
            }
            ASL_ACC => {
                self.a = self.asl(self.a);
            }
            ASL_ZP => {
                let addr = self.addr_zp();
                self.modify(addr, Self::asl);
            }
            ASL_ZPX => {
                let addr = self.addr_zpx();
                self.modify(addr, Self::asl);
            }
            ASL_ABS => {
                let addr = self.addr_abs();
                self.modify(addr, Self::asl);
            }
            ASL_ABSX => {
                let (addr, _) = self.addr_absx();
                self.modify(addr, Self::asl);
            }
            BCC => {
                cycles += self.branch_if(self.p & FLAG_CARRY == 0);
            }
            BCS => {
                cycles += self.branch_if(self.p & FLAG_CARRY != 0);
            }
            BEQ => {
                cycles += self.branch_if(self.p & FLAG_ZERO != 0);
            }
            BMI => {
                cycles += self.branch_if(self.p & FLAG_NEGATIVE != 0);
            }
            BNE => {
                cycles += self.branch_if(self.p & FLAG_ZERO == 0);
            }
            BPL => {
                cycles += self.branch_if(self.p & FLAG_NEGATIVE == 0);
            }
            BVC => {
                cycles += self.branch_if(self.p & FLAG_OVERFLOW == 0);
            }
            BVS => {
                cycles += self.branch_if(self.p & FLAG_OVERFLOW != 0);
            }
            BIT_ZP => {
                let addr = self.addr_zp();
                let value = self.read(addr);
                self.bit(value);
            }
            BIT_ABS => {
                let addr = self.addr_abs();
                let value = self.read(addr);
                self.bit(value);
            }
            BRK => {
                // Push the address of the byte after BRK's padding byte,
                // then the status with B and the unused bit forced on.
                let return_addr = self.pc.wrapping_add(1);
                self.push_word(return_addr);
                self.push_byte(self.p | FLAG_BREAK | FLAG_UNUSED);
                self.p |= FLAG_INTERRUPT;
                self.pc = self.memory.borrow().read_u16(IRQ_VECTOR);
            }
            CLC => {
                self.set_flag(FLAG_CARRY, false);
            }
            CLD => {
                self.set_flag(FLAG_DECIMAL, false);
            }
            CLI => {
                self.set_flag(FLAG_INTERRUPT, false);
            }
            CLV => {
                self.set_flag(FLAG_OVERFLOW, false);
            }
            CMP_IMM => {
                let value = self.read_byte();
                self.compare(self.a, value);
            }
            CMP_ZP => {
                let addr = self.addr_zp();
                let value = self.read(addr);
                self.compare(self.a, value);
            }
            CMP_ZPX => {
                let addr = self.addr_zpx();
                let value = self.read(addr);
                self.compare(self.a, value);
            }
            CMP_ABS => {
                let addr = self.addr_abs();
                let value = self.read(addr);
                self.compare(self.a, value);
            }
            CMP_ABSX => {
                let (addr, crossed) = self.addr_absx();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.compare(self.a, value);
            }
            CMP_ABSY => {
                let (addr, crossed) = self.addr_absy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.compare(self.a, value);
            }
            CMP_INDX => {
                let addr = self.addr_indx();
                let value = self.read(addr);
                self.compare(self.a, value);
            }
            CMP_INDY => {
                let (addr, crossed) = self.addr_indy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.compare(self.a, value);
            }
            CPX_IMM => {
                let value = self.read_byte();
                self.compare(self.x, value);
            }
            CPX_ZP => {
                let addr = self.addr_zp();
                let value = self.read(addr);
                self.compare(self.x, value);
            }
            CPX_ABS => {
                let addr = self.addr_abs();
                let value = self.read(addr);
                self.compare(self.x, value);
            }
            CPY_IMM => {
                let value = self.read_byte();
                self.compare(self.y, value);
            }
            CPY_ZP => {
                let addr = self.addr_zp();
                let value = self.read(addr);
                self.compare(self.y, value);
            }
            CPY_ABS => {
                let addr = self.addr_abs();
                let value = self.read(addr);
                self.compare(self.y, value);
            }
            DEC_ZP => {
                let addr = self.addr_zp();
                self.modify(addr, Self::dec);
            }
            DEC_ZPX => {
                let addr = self.addr_zpx();
                self.modify(addr, Self::dec);
            }
            DEC_ABS => {
                let addr = self.addr_abs();
                self.modify(addr, Self::dec);
            }
            DEC_ABSX => {
                let (addr, _) = self.addr_absx();
                self.modify(addr, Self::dec);
            }
            DEX => {
                self.x = self.x.wrapping_sub(1);
                self.update_zero_and_negative_flags(self.x);
            }
            DEY => {
                self.y = self.y.wrapping_sub(1);
                self.update_zero_and_negative_flags(self.y);
            }
            EOR_IMM => {
                let value = self.read_byte();
                self.eor(value);
            }
            EOR_ZP => {
                let addr = self.addr_zp();
                let value = self.read(addr);
                self.eor(value);
            }
            EOR_ZPX => {
                let addr = self.addr_zpx();
                let value = self.read(addr);
                self.eor(value);
            }
            EOR_ABS => {
                let addr = self.addr_abs();
                let value = self.read(addr);
                self.eor(value);
            }
            EOR_ABSX => {
                let (addr, crossed) = self.addr_absx();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.eor(value);
            }
            EOR_ABSY => {
                let (addr, crossed) = self.addr_absy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.eor(value);
            }
            EOR_INDX => {
                let addr = self.addr_indx();
                let value = self.read(addr);
                self.eor(value);
            }
            EOR_INDY => {
                let (addr, crossed) = self.addr_indy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.eor(value);
            }
            INC_ZP => {
                let addr = self.addr_zp();
                self.modify(addr, Self::inc);
            }
            INC_ZPX => {
                let addr = self.addr_zpx();
                self.modify(addr, Self::inc);
            }
            INC_ABS => {
                let addr = self.addr_abs();
                self.modify(addr, Self::inc);
            }
            INC_ABSX => {
                let (addr, _) = self.addr_absx();
                self.modify(addr, Self::inc);
            }
            INX => {
                self.x = self.x.wrapping_add(1);
                self.update_zero_and_negative_flags(self.x);
            }
            INY => {
                self.y = self.y.wrapping_add(1);
                self.update_zero_and_negative_flags(self.y);
            }
            JMP_ABS => {
                self.pc = self.addr_abs();
            }
            JMP_IND => {
                self.pc = self.addr_ind();
            }
            JSR => {
                let addr = self.addr_abs();
                // Push the address of the last byte of the JSR instruction,
                // not the next instruction; RTS adds the missing 1.
                let return_addr = self.pc.wrapping_sub(1);
                self.push_word(return_addr);
                self.pc = addr;
            }
            LDA_IMM => {
                let value = self.read_byte();
                self.lda(value);
            }
            LDA_ZP => {
                let addr = self.addr_zp();
                let value = self.read(addr);
                self.lda(value);
            }
            LDA_ZPX => {
                let addr = self.addr_zpx();
                let value = self.read(addr);
                self.lda(value);
            }
            LDA_ABS => {
                let addr = self.addr_abs();
                let value = self.read(addr);
                self.lda(value);
            }
            LDA_ABSX => {
                let (addr, crossed) = self.addr_absx();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.lda(value);
            }
            LDA_ABSY => {
                let (addr, crossed) = self.addr_absy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.lda(value);
            }
            LDA_INDX => {
                let addr = self.addr_indx();
                let value = self.read(addr);
                self.lda(value);
            }
            LDA_INDY => {
                let (addr, crossed) = self.addr_indy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.lda(value);
            }
            LDX_IMM => {
                let value = self.read_byte();
                self.ldx(value);
            }
            LDX_ZP => {
                let addr = self.addr_zp();
                let value = self.read(addr);
                self.ldx(value);
            }
            LDX_ZPY => {
                let addr = self.addr_zpy();
                let value = self.read(addr);
                self.ldx(value);
            }
            LDX_ABS => {
                let addr = self.addr_abs();
                let value = self.read(addr);
                self.ldx(value);
            }
            LDX_ABSY => {
                let (addr, crossed) = self.addr_absy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.ldx(value);
            }
            LDY_IMM => {
                let value = self.read_byte();
                self.ldy(value);
            }
            LDY_ZP => {
                let addr = self.addr_zp();
                let value = self.read(addr);
                self.ldy(value);
            }
            LDY_ZPX => {
                let addr = self.addr_zpx();
                let value = self.read(addr);
                self.ldy(value);
            }
            LDY_ABS => {
                let addr = self.addr_abs();
                let value = self.read(addr);
                self.ldy(value);
            }
            LDY_ABSX => {
                let (addr, crossed) = self.addr_absx();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.ldy(value);
            }
            LSR_ACC => {
                self.a = self.lsr(self.a);
            }
            LSR_ZP => {
                let addr = self.addr_zp();
                self.modify(addr, Self::lsr);
            }
            LSR_ZPX => {
                let addr = self.addr_zpx();
                self.modify(addr, Self::lsr);
            }
            LSR_ABS => {
                let addr = self.addr_abs();
                self.modify(addr, Self::lsr);
            }
            LSR_ABSX => {
                let (addr, _) = self.addr_absx();
                self.modify(addr, Self::lsr);
            }
            NOP => {}
            ORA_IMM => {
                let value = self.read_byte();
                self.ora(value);
            }
            ORA_ZP => {
                let addr = self.addr_zp();
                let value = self.read(addr);
                self.ora(value);
            }
            ORA_ZPX => {
                let addr = self.addr_zpx();
                let value = self.read(addr);
                self.ora(value);
            }
            ORA_ABS => {
                let addr = self.addr_abs();
                let value = self.read(addr);
                self.ora(value);
            }
            ORA_ABSX => {
                let (addr, crossed) = self.addr_absx();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.ora(value);
            }
            ORA_ABSY => {
                let (addr, crossed) = self.addr_absy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.ora(value);
            }
            ORA_INDX => {
                let addr = self.addr_indx();
                let value = self.read(addr);
                self.ora(value);
            }
            ORA_INDY => {
                let (addr, crossed) = self.addr_indy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.ora(value);
            }
            PHA => {
                self.push_byte(self.a);
            }
            PHP => {
                // Status is pushed with B and the unused bit forced on.
                self.push_byte(self.p | FLAG_BREAK | FLAG_UNUSED);
            }
            PLA => {
                self.a = self.pop_byte();
                self.update_zero_and_negative_flags(self.a);
            }
            PLP => {
                let value = self.pop_byte();
                self.p = self.restore_status(value);
            }
            ROL_ACC => {
                self.a = self.rol(self.a);
            }
            ROL_ZP => {
                let addr = self.addr_zp();
                self.modify(addr, Self::rol);
            }
            ROL_ZPX => {
                let addr = self.addr_zpx();
                self.modify(addr, Self::rol);
            }
            ROL_ABS => {
                let addr = self.addr_abs();
                self.modify(addr, Self::rol);
            }
            ROL_ABSX => {
                let (addr, _) = self.addr_absx();
                self.modify(addr, Self::rol);
            }
            ROR_ACC => {
                self.a = self.ror(self.a);
            }
            ROR_ZP => {
                let addr = self.addr_zp();
                self.modify(addr, Self::ror);
            }
            ROR_ZPX => {
                let addr = self.addr_zpx();
                self.modify(addr, Self::ror);
            }
            ROR_ABS => {
                let addr = self.addr_abs();
                self.modify(addr, Self::ror);
            }
            ROR_ABSX => {
                let (addr, _) = self.addr_absx();
                self.modify(addr, Self::ror);
            }
            RTI => {
                let value = self.pop_byte();
                self.p = self.restore_status(value);
                self.pc = self.pop_word();
            }
            RTS => {
                self.pc = self.pop_word().wrapping_add(1);
            }
            SBC_IMM => {
                let value = self.read_byte();
                self.sbc(value);
            }
            SBC_ZP => {
                let addr = self.addr_zp();
                let value = self.read(addr);
                self.sbc(value);
            }
            SBC_ZPX => {
                let addr = self.addr_zpx();
                let value = self.read(addr);
                self.sbc(value);
            }
            SBC_ABS => {
                let addr = self.addr_abs();
                let value = self.read(addr);
                self.sbc(value);
            }
            SBC_ABSX => {
                let (addr, crossed) = self.addr_absx();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.sbc(value);
            }
            SBC_ABSY => {
                let (addr, crossed) = self.addr_absy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.sbc(value);
            }
            SBC_INDX => {
                let addr = self.addr_indx();
                let value = self.read(addr);
                self.sbc(value);
            }
            SBC_INDY => {
                let (addr, crossed) = self.addr_indy();
                if crossed {
                    cycles += 1;
                }
                let value = self.read(addr);
                self.sbc(value);
            }
            SEC => {
                self.set_flag(FLAG_CARRY, true);
            }
            SED => {
                self.set_flag(FLAG_DECIMAL, true);
            }
            SEI => {
                self.set_flag(FLAG_INTERRUPT, true);
            }
            STA_ZP => {
                let addr = self.addr_zp();
                self.write(addr, self.a);
            }
            STA_ZPX => {
                let addr = self.addr_zpx();
                self.write(addr, self.a);
            }
            STA_ABS => {
                let addr = self.addr_abs();
                self.write(addr, self.a);
            }
            STA_ABSX => {
                let (addr, _) = self.addr_absx();
                self.write(addr, self.a);
            }
            STA_ABSY => {
                let (addr, _) = self.addr_absy();
                self.write(addr, self.a);
            }
            STA_INDX => {
                let addr = self.addr_indx();
                self.write(addr, self.a);
            }
            STA_INDY => {
                let (addr, _) = self.addr_indy();
                self.write(addr, self.a);
            }
            STX_ZP => {
                let addr = self.addr_zp();
                self.write(addr, self.x);
            }
            STX_ZPY => {
                let addr = self.addr_zpy();
                self.write(addr, self.x);
            }
            STX_ABS => {
                let addr = self.addr_abs();
                self.write(addr, self.x);
            }
            STY_ZP => {
                let addr = self.addr_zp();
                self.write(addr, self.y);
            }
            STY_ZPX => {
                let addr = self.addr_zpx();
                self.write(addr, self.y);
            }
            STY_ABS => {
                let addr = self.addr_abs();
                self.write(addr, self.y);
            }
            TAX => {
                self.x = self.a;
                self.update_zero_and_negative_flags(self.x);
            }
            TAY => {
                self.y = self.a;
                self.update_zero_and_negative_flags(self.y);
            }
            TSX => {
                self.x = self.sp;
                self.update_zero_and_negative_flags(self.x);
            }
            TXA => {
                self.a = self.x;
                self.update_zero_and_negative_flags(self.a);
            }
            TXS => {
                // The one transfer with no flag side effect
                self.sp = self.x;
            }
            TYA => {
                self.a = self.y;
                self.update_zero_and_negative_flags(self.a);
            }
            _ => {
                // Unassigned byte, already reported above: no effect, no
                // operand bytes consumed.
            }
        }

        self.total_cycles += cycles as u64;
        cycles
    }

    // --- Flag accessors ---

    /// True if the carry flag is set
    #[inline(always)]
    pub fn carry_flag_set(&self) -> bool {
        self.p & FLAG_CARRY != 0
    }

    /// True if the zero flag is set
    #[inline(always)]
    pub fn zero_flag_set(&self) -> bool {
        self.p & FLAG_ZERO != 0
    }

    /// True if the interrupt disable flag is set
    #[inline(always)]
    pub fn interrupt_disable_set(&self) -> bool {
        self.p & FLAG_INTERRUPT != 0
    }

    /// True if the decimal mode flag is set
    #[inline(always)]
    pub fn decimal_mode_set(&self) -> bool {
        self.p & FLAG_DECIMAL != 0
    }

    /// True if the break command flag is set
    #[inline(always)]
    pub fn break_command_set(&self) -> bool {
        self.p & FLAG_BREAK != 0
    }

    /// True if the overflow flag is set
    #[inline(always)]
    pub fn overflow_flag_set(&self) -> bool {
        self.p & FLAG_OVERFLOW != 0
    }

    /// True if the negative flag is set
    #[inline(always)]
    pub fn negative_flag_set(&self) -> bool {
        self.p & FLAG_NEGATIVE != 0
    }

    // --- Addressing-mode resolution ---
    //
    // Each resolver consumes the operand bytes at pc and returns the
    // effective address. The indexed absolute and post-indexed indirect
    // forms also report whether indexing crossed a page, which costs an
    // extra cycle in the read forms.

    /// Check if two addresses are on different pages
    fn page_crossed(addr1: u16, addr2: u16) -> bool {
        (addr1 & 0xFF00) != (addr2 & 0xFF00)
    }

    fn addr_zp(&mut self) -> u16 {
        self.read_byte() as u16
    }

    fn addr_zpx(&mut self) -> u16 {
        // Indexing wraps within page 0
        self.read_byte().wrapping_add(self.x) as u16
    }

    fn addr_zpy(&mut self) -> u16 {
        self.read_byte().wrapping_add(self.y) as u16
    }

    fn addr_abs(&mut self) -> u16 {
        self.read_word()
    }

    fn addr_absx(&mut self) -> (u16, bool) {
        let base = self.read_word();
        let addr = base.wrapping_add(self.x as u16);
        (addr, Self::page_crossed(base, addr))
    }

    fn addr_absy(&mut self) -> (u16, bool) {
        let base = self.read_word();
        let addr = base.wrapping_add(self.y as u16);
        (addr, Self::page_crossed(base, addr))
    }

    /// Indirect addressing, used only by JMP
    fn addr_ind(&mut self) -> u16 {
        let ptr = self.read_word();
        self.read_word_indirect(ptr)
    }

    /// ($zp,X): pointer pre-indexed by X, wrapping within page 0
    fn addr_indx(&mut self) -> u16 {
        let ptr = self.read_byte().wrapping_add(self.x);
        self.read_word_from_zp(ptr)
    }

    /// ($zp),Y: pointer dereferenced, then indexed by Y
    fn addr_indy(&mut self) -> (u16, bool) {
        let ptr = self.read_byte();
        let base = self.read_word_from_zp(ptr);
        let addr = base.wrapping_add(self.y as u16);
        (addr, Self::page_crossed(base, addr))
    }

    // --- Memory access ---

    fn read(&self, addr: u16) -> u8 {
        self.memory.borrow().read(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.memory.borrow_mut().write(addr, value);
    }

    /// Read a byte from memory at pc and advance pc
    fn read_byte(&mut self) -> u8 {
        let value = self.memory.borrow().read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    /// Read a 16-bit word from memory at pc (little-endian) and advance pc
    fn read_word(&mut self) -> u16 {
        let lo = self.read_byte() as u16;
        let hi = self.read_byte() as u16;
        (hi << 8) | lo
    }

    /// Read a 16-bit word from zero page (wraps at the page boundary)
    fn read_word_from_zp(&self, addr: u8) -> u16 {
        let lo = self.read(addr as u16) as u16;
        let hi = self.read(addr.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    }

    /// Read a word through an indirect pointer with the 6502 page boundary
    /// quirk: if the pointer sits at the last byte of a page (e.g. $10FF),
    /// the high byte comes from the start of the same page ($1000), not
    /// the next page ($1100). Real hardware does this and programs depend
    /// on it, so it is reproduced rather than fixed.
    fn read_word_indirect(&self, ptr: u16) -> u16 {
        let lo = self.read(ptr) as u16;
        let hi_addr = if ptr & 0x00FF == 0x00FF {
            ptr & 0xFF00
        } else {
            ptr + 1
        };
        let hi = self.read(hi_addr) as u16;
        (hi << 8) | lo
    }

    /// Read a value from `addr`, run `op` on it and write the result back.
    /// Shared shape of every memory read-modify-write instruction.
    fn modify(&mut self, addr: u16, op: fn(&mut Self, u8) -> u8) {
        let value = self.read(addr);
        let result = op(self, value);
        self.write(addr, result);
    }

    // --- Stack ---

    /// Push a byte onto the stack
    fn push_byte(&mut self, value: u8) {
        let addr = STACK_BASE | (self.sp as u16);
        self.write(addr, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    /// Push a word onto the stack (high byte first)
    fn push_word(&mut self, value: u16) {
        self.push_byte((value >> 8) as u8);
        self.push_byte(value as u8);
    }

    /// Pull a byte from the stack
    fn pop_byte(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        let addr = STACK_BASE | (self.sp as u16);
        self.read(addr)
    }

    /// Pull a word from the stack (low byte first)
    fn pop_word(&mut self) -> u16 {
        let lo = self.pop_byte() as u16;
        let hi = self.pop_byte() as u16;
        (hi << 8) | lo
    }

    // --- Flag policy ---

    /// Set or clear a status flag
    #[inline(always)]
    fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.p |= flag;
        } else {
            self.p &= !flag;
        }
    }

    /// Update Zero and Negative flags from a result byte
    fn update_zero_and_negative_flags(&mut self, value: u8) {
        self.set_flag(FLAG_ZERO, value == 0);
        self.set_flag(FLAG_NEGATIVE, value & 0x80 != 0);
    }

    /// Status as restored by PLP/RTI. B and the unused bit are never stored
    /// in memory, only synthesized on push, so the live bits survive the
    /// pull untouched.
    fn restore_status(&self, pulled: u8) -> u8 {
        (pulled & !(FLAG_BREAK | FLAG_UNUSED)) | (self.p & (FLAG_BREAK | FLAG_UNUSED))
    }

    // --- Operations ---

    /// Add with Carry: A + value + C. Carry out of bit 7 sets C; a result
    /// whose sign disagrees with two same-signed operands sets V. Also the
    /// single arithmetic core for SBC, which feeds it the complemented
    /// operand so the two cannot drift apart.
    fn adc(&mut self, value: u8) {
        let carry = (self.p & FLAG_CARRY) as u16;
        let sum = self.a as u16 + value as u16 + carry;
        let result = sum as u8;
        self.set_flag(FLAG_CARRY, sum > 0xFF);
        self.set_flag(FLAG_OVERFLOW, (!(self.a ^ value) & (self.a ^ result)) & 0x80 != 0);
        self.a = result;
        self.update_zero_and_negative_flags(result);
    }

    /// Subtract with Carry: A - value - (1 - C), computed as addition of
    /// the bit-complemented operand
    fn sbc(&mut self, value: u8) {
        self.adc(!value);
    }

    /// Bitwise AND into the accumulator
    fn and(&mut self, value: u8) {
        self.a &= value;
        self.update_zero_and_negative_flags(self.a);
    }

    /// Bitwise inclusive OR into the accumulator
    fn ora(&mut self, value: u8) {
        self.a |= value;
        self.update_zero_and_negative_flags(self.a);
    }

    /// Bitwise exclusive OR into the accumulator
    fn eor(&mut self, value: u8) {
        self.a ^= value;
        self.update_zero_and_negative_flags(self.a);
    }

    /// Bit test: Z from A & value, N and V copied from bits 7 and 6 of the
    /// operand. A is not modified.
    fn bit(&mut self, value: u8) {
        self.set_flag(FLAG_ZERO, self.a & value == 0);
        self.set_flag(FLAG_NEGATIVE, value & 0x80 != 0);
        self.set_flag(FLAG_OVERFLOW, value & 0x40 != 0);
    }

    /// Compare: register - value without storing the result. C means
    /// register >= value (unsigned); Z/N come from the difference.
    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.set_flag(FLAG_CARRY, register >= value);
        self.update_zero_and_negative_flags(result);
    }

    /// Arithmetic shift left; bit 7 goes to Carry
    fn asl(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, value & 0x80 != 0);
        let result = value << 1;
        self.update_zero_and_negative_flags(result);
        result
    }

    /// Logical shift right; bit 0 goes to Carry
    fn lsr(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, value & 0x01 != 0);
        let result = value >> 1;
        self.update_zero_and_negative_flags(result);
        result
    }

    /// Rotate left through Carry
    fn rol(&mut self, value: u8) -> u8 {
        let carry_in = self.p & FLAG_CARRY;
        self.set_flag(FLAG_CARRY, value & 0x80 != 0);
        let result = (value << 1) | carry_in;
        self.update_zero_and_negative_flags(result);
        result
    }

    /// Rotate right through Carry
    fn ror(&mut self, value: u8) -> u8 {
        let carry_in = if self.p & FLAG_CARRY != 0 { 0x80 } else { 0 };
        self.set_flag(FLAG_CARRY, value & 0x01 != 0);
        let result = (value >> 1) | carry_in;
        self.update_zero_and_negative_flags(result);
        result
    }

    /// Increment a value, wrapping mod 256; Carry and Overflow untouched
    fn inc(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        self.update_zero_and_negative_flags(result);
        result
    }

    /// Decrement a value, wrapping mod 256; Carry and Overflow untouched
    fn dec(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        self.update_zero_and_negative_flags(result);
        result
    }

    /// Load Accumulator
    fn lda(&mut self, value: u8) {
        self.a = value;
        self.update_zero_and_negative_flags(value);
    }

    /// Load X register
    fn ldx(&mut self, value: u8) {
        self.x = value;
        self.update_zero_and_negative_flags(value);
    }

    /// Load Y register
    fn ldy(&mut self, value: u8) {
        self.y = value;
        self.update_zero_and_negative_flags(value);
    }

    /// Read the branch offset and, if the condition holds, apply it.
    /// Returns the extra cycles: 1 when taken, 2 when taking it crosses a
    /// page boundary.
    fn branch_if(&mut self, condition: bool) -> u8 {
        let offset = self.read_byte() as i8;
        if !condition {
            return 0;
        }
        let old_pc = self.pc;
        self.pc = self.pc.wrapping_add(offset as u16);
        if Self::page_crossed(old_pc, self.pc) { 2 } else { 1 }
    }
}
